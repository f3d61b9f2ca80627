use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 可被停止信号打断的等待
pub async fn pause(duration: Duration, cancel: &CancellationToken) {
    if duration.is_zero() {
        return;
    }
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}
