//! # Review Analyser
//!
//! 抓取 Steam 商店评论，并交给大模型按六个维度逐条分析的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 客户端层（Clients）
//! - `clients/` - 对外部服务的薄封装，只暴露能力
//! - `ReviewFeed` - 评论数据源（Steam 实现）
//! - `AnalysisBackend` - 分析后端（Ollama / OpenAI / Gemini / Claude）
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `ReviewCrawler` - 游标分页抓取、退避、检查点
//! - `OutputParser` - 解析模型输出
//! - `CheckpointStore` - CSV / JSON 结果文件读写
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个应用 × 一个模型"的完整分析流程
//! - `AnalysisCtx` - 上下文封装（应用 + 模型）
//! - `AnalysisEngine` - 续跑 → 批量/逐条分析 → 定期保存
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/runner` - 运行生命周期、停止信号
//! - `orchestrator/pipeline` - 逐个应用、逐个模型调度
//! - `orchestrator/phase_tracker` - 阶段状态机
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{Phase, ProgressEvent};
pub use orchestrator::{Orchestrator, RunOverrides};
pub use workflow::{AnalysisCtx, AnalysisEngine, ReviewOutcome};
