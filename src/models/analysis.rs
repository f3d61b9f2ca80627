//! 分析结果数据模型

use crate::models::identity::{Identified, ReviewIdentity};
use crate::models::review::RawReview;

/// 分析维度
///
/// 固定顺序：能力 / 自主 / 关系 × 满足 / 受挫
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Construct {
    CompetenceSatisfaction,
    CompetenceFrustration,
    AutonomySatisfaction,
    AutonomyFrustration,
    RelatednessSatisfaction,
    RelatednessFrustration,
}

impl Construct {
    /// 全部维度，按输出列顺序
    pub const ALL: [Construct; 6] = [
        Construct::CompetenceSatisfaction,
        Construct::CompetenceFrustration,
        Construct::AutonomySatisfaction,
        Construct::AutonomyFrustration,
        Construct::RelatednessSatisfaction,
        Construct::RelatednessFrustration,
    ];

    /// 模型输出中的标题
    pub fn key(self) -> &'static str {
        match self {
            Construct::CompetenceSatisfaction => "COMPETENCE SATISFACTION",
            Construct::CompetenceFrustration => "COMPETENCE FRUSTRATION",
            Construct::AutonomySatisfaction => "AUTONOMY SATISFACTION",
            Construct::AutonomyFrustration => "AUTONOMY FRUSTRATION",
            Construct::RelatednessSatisfaction => "RELATEDNESS SATISFACTION",
            Construct::RelatednessFrustration => "RELATEDNESS FRUSTRATION",
        }
    }

    /// 判断列名
    pub fn flag_column(self) -> String {
        format!("{}_TF", self.key())
    }

    /// 引文列名
    pub fn quote_column(self) -> String {
        format!("{}_QUOTE", self.key())
    }
}

/// 原始输出列名
pub const RAW_OUTPUT_COLUMN: &str = "raw_llm_output";

/// 单个维度的判断
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstructJudgement {
    /// None 表示模型没有给出判断
    pub flag: Option<bool>,
    /// 仅在判断为真时保留
    pub quote: String,
}

/// 分析记录：原始评论加六个维度的判断
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRecord {
    pub review: RawReview,
    /// 与 [`Construct::ALL`] 一一对应
    pub judgements: [ConstructJudgement; 6],
    pub raw_output: String,
}

impl AnalysisRecord {
    pub fn new(review: RawReview, judgements: [ConstructJudgement; 6], raw_output: String) -> Self {
        Self {
            review,
            judgements,
            raw_output,
        }
    }

    /// 读取某个维度的判断
    pub fn judgement(&self, construct: Construct) -> &ConstructJudgement {
        &self.judgements[construct as usize]
    }
}

impl Identified for AnalysisRecord {
    fn identity(&self) -> ReviewIdentity {
        self.review.identity()
    }
}

/// 每个 (应用, 模型) 的分析数量上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisLimit {
    Bounded(usize),
    Unlimited,
}

impl AnalysisLimit {
    /// 已有 `existing` 条结果时还能分析多少条
    pub fn remaining(self, existing: usize) -> Option<usize> {
        match self {
            AnalysisLimit::Bounded(n) => Some(n.saturating_sub(existing)),
            AnalysisLimit::Unlimited => None,
        }
    }

    /// 已有结果是否已经达到上限
    pub fn is_satisfied_by(self, existing: usize) -> bool {
        matches!(self, AnalysisLimit::Bounded(n) if existing >= n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construct_columns() {
        assert_eq!(
            Construct::AutonomyFrustration.flag_column(),
            "AUTONOMY FRUSTRATION_TF"
        );
        assert_eq!(
            Construct::RelatednessSatisfaction.quote_column(),
            "RELATEDNESS SATISFACTION_QUOTE"
        );
    }

    #[test]
    fn test_limit() {
        assert_eq!(AnalysisLimit::Bounded(10).remaining(4), Some(6));
        assert_eq!(AnalysisLimit::Bounded(10).remaining(12), Some(0));
        assert_eq!(AnalysisLimit::Unlimited.remaining(12), None);
        assert!(AnalysisLimit::Bounded(3).is_satisfied_by(3));
        assert!(!AnalysisLimit::Unlimited.is_satisfied_by(1_000));
    }
}
