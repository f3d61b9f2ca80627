pub mod llm_client;
pub mod steam_client;

pub use llm_client::{AnalysisBackend, BackendFactory, LlmBackendFactory, LlmClient, ProviderKind};
pub use steam_client::{AppCatalog, FeedPage, ReviewFeed, SteamReviewFeed};
