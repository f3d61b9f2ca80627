pub mod checkpoint_store;
pub mod crawler;
pub mod csv_codec;
pub mod output_parser;
pub mod review_filter;

pub use checkpoint_store::{AppSummary, CheckpointStore, RawAvailability};
pub use crawler::{CrawlReport, CrawlSettings, CrawlStop, ReviewCrawler};
pub use output_parser::OutputParser;
pub use review_filter::{clean, filter_reviews};
