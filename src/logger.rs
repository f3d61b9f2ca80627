use tracing_subscriber::{fmt, EnvFilter};

/// 初始化日志系统
///
/// 使用 `RUST_LOG` 环境变量控制级别，默认 `info`。
/// 日志写到 stderr，stdout 留给事件流。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
