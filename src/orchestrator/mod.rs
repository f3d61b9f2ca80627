//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责运行生命周期和流程调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `runner` - 编排器
//! - 持有唯一的后台任务和停止信号
//! - 拒绝重复启动
//! - 每次运行前重新加载配置
//!
//! ### `pipeline` - 单次运行
//! - 遍历应用（WorkItem），抓取或复用原始评论
//! - 遍历 (后端, 模型) 组合，委托 AnalysisEngine
//! - 生成汇总报告
//! - 收尾：阶段结束 → 空闲 → 运行结束事件
//!
//! ### `phase_tracker` - 阶段跟踪
//!
//! ## 层次关系
//!
//! ```text
//! runner (运行生命周期)
//!     ↓
//! pipeline (处理 Vec<WorkItem>)
//!     ↓
//! workflow::AnalysisEngine (处理单个 应用 × 模型)
//!     ↓
//! services (能力层：crawler / parser / checkpoint)
//!     ↓
//! clients (ReviewFeed / AnalysisBackend)
//! ```

pub mod phase_tracker;
pub mod pipeline;
pub mod runner;

pub use phase_tracker::PhaseTracker;
pub use pipeline::{RunKind, RunOverrides};
pub use runner::Orchestrator;
