pub mod analysis;
pub mod event;
pub mod identity;
pub mod phase;
pub mod review;

pub use analysis::{AnalysisLimit, AnalysisRecord, Construct, ConstructJudgement, RAW_OUTPUT_COLUMN};
pub use event::{LogLevel, ProgressEvent, ProgressSink};
pub use identity::{diff, identity, merge, Identified, ReviewIdentity};
pub use phase::Phase;
pub use review::{ProviderModelPair, RawReview, WorkItem};
