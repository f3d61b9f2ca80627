//! 进度事件
//!
//! 运行过程中产生的事件通过无界通道发给外部消费者（CLI 打印为 JSON 行）。

use crate::models::phase::Phase;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// 进度事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Log {
        level: LogLevel,
        message: String,
    },
    AnalysisStarted {
        process_type: Phase,
        message: String,
    },
    ProcessTypeChange {
        process_type: Phase,
        message: String,
    },
    PhaseEnded {
        process_type: Phase,
    },
    ProgressAppsTotal {
        value: usize,
    },
    ProgressAppsCurrent {
        value: usize,
    },
    ProgressReviewsTotal {
        value: usize,
    },
    ProgressReviewsCurrent {
        value: usize,
        provider: String,
        model: String,
    },
    ScrapingProgress {
        app_id: u32,
        reviews_scraped: usize,
        elapsed_time: String,
        is_complete_scraping: bool,
        total_errors: usize,
    },
    StatusUpdate {
        app: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    MissingRawReviews {
        missing_apps: Vec<String>,
    },
    AnalysisFinished,
}

/// 事件发送端
///
/// 日志类事件同时写入 tracing；消费者已关闭时静默丢弃
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: UnboundedSender<ProgressEvent>,
}

impl ProgressSink {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }

    /// 创建发送端与对应的接收端
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warning => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        self.emit(ProgressEvent::Log { level, message });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let event = ProgressEvent::ProcessTypeChange {
            process_type: Phase::BatchAnalysis,
            message: "Batch analysing reviews...".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "process_type_change",
                "process_type": "batch_analysis",
                "message": "Batch analysing reviews..."
            })
        );

        let finished = serde_json::to_value(ProgressEvent::AnalysisFinished).unwrap();
        assert_eq!(finished, json!({"type": "analysis_finished"}));

        let status = ProgressEvent::StatusUpdate {
            app: "Dota 2".to_string(),
            model: None,
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"type": "status_update", "app": "Dota 2"})
        );
    }

    #[test]
    fn test_sink_survives_closed_receiver() {
        let (sink, rx) = ProgressSink::channel();
        drop(rx);
        sink.warn("nobody listening");
    }

    #[test]
    fn test_sink_log_levels() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.warn("careful");

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            ProgressEvent::Log {
                level: LogLevel::Warning,
                message: "careful".to_string()
            }
        );
        assert_eq!(
            serde_json::to_value(&event).unwrap()["level"],
            json!("warning")
        );
    }
}
