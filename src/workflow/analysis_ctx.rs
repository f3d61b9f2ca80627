//! 分析上下文
//!
//! 封装"我正在用哪个模型分析哪个应用"这一信息

use crate::models::{ProviderModelPair, WorkItem};
use std::fmt::Display;

/// 分析上下文
#[derive(Debug, Clone)]
pub struct AnalysisCtx {
    pub item: WorkItem,
    pub pair: ProviderModelPair,
}

impl AnalysisCtx {
    pub fn new(item: WorkItem, pair: ProviderModelPair) -> Self {
        Self { item, pair }
    }

    /// 模型显示名称，也用于结果文件名
    pub fn model(&self) -> &str {
        &self.pair.model
    }
}

impl Display for AnalysisCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}@{} 应用 ID#{}]",
            self.item.name, self.pair, self.item.app_id
        )
    }
}
