pub mod analysis_ctx;
pub mod analysis_engine;

pub use analysis_ctx::AnalysisCtx;
pub use analysis_engine::{AnalysisEngine, AnalysisRequest, ReviewOutcome};
