//! 编排器 - 编排层
//!
//! 持有唯一的后台任务、当前阶段和停止信号。
//! 同一时间只允许一次运行，运行中再次启动会被拒绝。
//! 流水线跑在内层任务里，外层监督任务在它异常退出时补发收尾事件。

use crate::clients::{BackendFactory, ReviewFeed};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{Phase, ProgressEvent, ProgressSink};
use crate::orchestrator::pipeline::{Pipeline, RunKind, RunOverrides};
use crate::orchestrator::PhaseTracker;
use crate::services::CrawlSettings;
use std::sync::Arc;
use tokio::sync::{mpsc::UnboundedReceiver, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// 编排器
pub struct Orchestrator {
    config: Config,
    feed: Arc<dyn ReviewFeed>,
    backends: Arc<dyn BackendFactory>,
    events: ProgressSink,
    phase: Arc<watch::Sender<Phase>>,
    crawl_delays: bool,
    worker: Option<Worker>,
}

impl Orchestrator {
    /// 创建编排器，返回事件接收端
    pub fn new(
        config: Config,
        feed: Arc<dyn ReviewFeed>,
        backends: Arc<dyn BackendFactory>,
    ) -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (events, rx) = ProgressSink::channel();
        let (phase, _) = watch::channel(Phase::Idle);
        let orchestrator = Self {
            config,
            feed,
            backends,
            events,
            phase: Arc::new(phase),
            crawl_delays: true,
            worker: None,
        };
        (orchestrator, rx)
    }

    /// 关闭抓取时的所有等待
    pub fn without_crawl_delays(mut self) -> Self {
        self.crawl_delays = false;
        self
    }

    /// 当前配置（最近一次运行加载的版本）
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 当前阶段
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// 订阅阶段变化
    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// 是否有运行中的任务
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// 启动分析（抓取或复用原始评论，然后分析）
    pub fn start_analysis(&mut self, overrides: RunOverrides) -> AppResult<()> {
        self.start(RunKind::Analysis, overrides)
    }

    /// 启动只抓取
    pub fn start_scraping(&mut self, overrides: RunOverrides) -> AppResult<()> {
        self.start(RunKind::Scraping, overrides)
    }

    /// 请求停止当前运行
    pub fn stop(&self) {
        match &self.worker {
            Some(worker) if !worker.handle.is_finished() => {
                worker.cancel.cancel();
                self.events
                    .info("Stop signal sent. Finishing current tasks and saving...");
            }
            _ => self.events.info("No process is currently running."),
        }
    }

    /// 等待当前运行结束
    ///
    /// 等待被中途取消时任务仍保留，之后还能 `stop`
    pub async fn wait(&mut self) {
        if let Some(worker) = self.worker.as_mut() {
            if let Err(e) = (&mut worker.handle).await {
                error!("❌ 监督任务异常退出: {}", e);
            }
            self.worker = None;
        }
    }

    fn start(&mut self, kind: RunKind, overrides: RunOverrides) -> AppResult<()> {
        if self.is_running() {
            self.events.warn("A process is already running.");
            return Err(AppError::AlreadyRunning);
        }

        // 每次运行前重新读取配置文件
        match self.config.reload() {
            Ok(config) => self.config = config,
            Err(e) => self
                .events
                .warn(format!("Failed to reload config, keeping previous settings: {}", e)),
        }

        let mut settings = CrawlSettings::from_config(&self.config.fetching);
        if !self.crawl_delays {
            settings = settings.without_delays();
        }

        let cancel = CancellationToken::new();
        let tracker = PhaseTracker::new(self.phase.clone(), self.events.clone());
        let pipeline = Pipeline::new(
            self.config.clone(),
            overrides,
            self.feed.clone(),
            self.backends.clone(),
            settings,
            self.events.clone(),
            tracker,
            cancel.clone(),
        );

        info!("▶️ 启动后台任务: {:?}", kind);
        let inner = tokio::spawn(pipeline.run(kind));
        let handle = tokio::spawn(supervise(
            inner,
            PhaseTracker::new(self.phase.clone(), self.events.clone()),
            self.events.clone(),
        ));
        self.worker = Some(Worker { handle, cancel });
        Ok(())
    }
}

/// 等待流水线任务结束
///
/// 流水线正常返回时已自行收尾；任务异常退出时在这里补上收尾，保证回到空闲
async fn supervise(inner: JoinHandle<()>, tracker: PhaseTracker, events: ProgressSink) {
    if let Err(e) = inner.await {
        error!("❌ 后台任务异常退出: {}", e);
        events.error(format!("Error: unexpected failure in background task: {}", e));
        tracker.finish();
        events.emit(ProgressEvent::AnalysisFinished);
    }
}
