use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// 运行阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Scraping,
    Analysis,
    BatchAnalysis,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Scraping => "scraping",
            Phase::Analysis => "analysis",
            Phase::BatchAnalysis => "batch_analysis",
        }
    }

    /// 阶段切换时的提示语
    pub fn announcement(self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::Scraping => "Scraping reviews...",
            Phase::Analysis => "Analysing reviews...",
            Phase::BatchAnalysis => "Batch analysing reviews...",
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
