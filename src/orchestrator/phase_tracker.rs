//! 阶段跟踪
//!
//! 每次运行持有一个跟踪器。重复的阶段通知会被抑制，切回空闲总是会发出。

use crate::models::{Phase, ProgressEvent, ProgressSink};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// 阶段跟踪器
pub struct PhaseTracker {
    current: Arc<watch::Sender<Phase>>,
    events: ProgressSink,
}

impl PhaseTracker {
    /// # 参数
    /// - `current`: 当前阶段的发布端，由编排器持有并对外提供查询
    /// - `events`: 事件发送端
    pub fn new(current: Arc<watch::Sender<Phase>>, events: ProgressSink) -> Self {
        Self { current, events }
    }

    /// 当前阶段
    pub fn current(&self) -> Phase {
        *self.current.borrow()
    }

    /// 开始一次运行
    pub fn start(&self, phase: Phase, message: impl Into<String>) {
        self.current.send_replace(phase);
        self.events.emit(ProgressEvent::AnalysisStarted {
            process_type: phase,
            message: message.into(),
        });
    }

    /// 切换阶段
    ///
    /// 与当前阶段相同时不发通知，返回 false；切回空闲总是发出
    pub fn change(&self, phase: Phase, message: impl Into<String>) -> bool {
        let previous = self.current.send_replace(phase);
        if previous == phase && phase != Phase::Idle {
            debug!("阶段未变化: {}", phase);
            return false;
        }
        self.events.emit(ProgressEvent::ProcessTypeChange {
            process_type: phase,
            message: message.into(),
        });
        true
    }

    /// 结束运行：报告最后一个阶段结束，然后回到空闲
    pub fn finish(&self) {
        let last = self.current();
        if last != Phase::Idle {
            self.events
                .emit(ProgressEvent::PhaseEnded { process_type: last });
        }
        self.change(Phase::Idle, Phase::Idle.announcement());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (
        PhaseTracker,
        tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>,
        watch::Receiver<Phase>,
    ) {
        let (sink, rx) = ProgressSink::channel();
        let (tx, watch_rx) = watch::channel(Phase::Idle);
        (PhaseTracker::new(Arc::new(tx), sink), rx, watch_rx)
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_repeated_phase_suppressed() {
        let (tracker, mut rx, watch_rx) = tracker();

        tracker.start(Phase::Scraping, "start");
        assert!(!tracker.change(Phase::Scraping, "again"));
        assert!(tracker.change(Phase::Analysis, "analyse"));
        assert!(!tracker.change(Phase::Analysis, "analyse"));
        assert_eq!(*watch_rx.borrow(), Phase::Analysis);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            ProgressEvent::ProcessTypeChange {
                process_type: Phase::Analysis,
                ..
            }
        ));
    }

    #[test]
    fn test_finish_reports_last_phase_then_idle() {
        let (tracker, mut rx, watch_rx) = tracker();
        tracker.start(Phase::Analysis, "start");
        tracker.change(Phase::BatchAnalysis, "batch");
        drain(&mut rx);

        tracker.finish();
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                ProgressEvent::PhaseEnded {
                    process_type: Phase::BatchAnalysis
                },
                ProgressEvent::ProcessTypeChange {
                    process_type: Phase::Idle,
                    message: "Idle".to_string()
                },
            ]
        );
        assert_eq!(*watch_rx.borrow(), Phase::Idle);
    }

    #[test]
    fn test_idle_always_delivered() {
        let (tracker, mut rx, _watch_rx) = tracker();
        assert!(tracker.change(Phase::Idle, "idle"));
        tracker.finish();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(
            e,
            ProgressEvent::ProcessTypeChange {
                process_type: Phase::Idle,
                ..
            }
        )));
    }
}
