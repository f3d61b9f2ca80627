pub mod logging;
pub mod timing;

pub use logging::{format_elapsed, truncate_text};
pub use timing::pause;
