//! 评论分析流程 - 流程层
//!
//! 核心职责：定义"一个应用 × 一个模型"的完整分析流程
//!
//! 流程顺序：
//! 1. 断点续跑：读取已有结果，找出尚未分析的评论
//! 2. 批量模式（后端支持且批大小 > 1）或逐条模式
//! 3. 定期写进度文件，结束时再写一次

use crate::clients::AnalysisBackend;
use crate::error::{AppError, BackendError};
use crate::models::{
    diff, AnalysisLimit, AnalysisRecord, Phase, ProgressEvent, ProgressSink, RawReview,
};
use crate::orchestrator::PhaseTracker;
use crate::services::{CheckpointStore, OutputParser};
use crate::utils::truncate_text;
use crate::workflow::analysis_ctx::AnalysisCtx;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 单条评论的处理结果
#[derive(Debug)]
pub enum ReviewOutcome {
    /// 分析成功
    Analysed(AnalysisRecord),
    /// 跳过（如正文为空）
    Skipped(String),
    /// 后端调用失败
    Failed(BackendError),
}

/// 一次分析请求
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub ctx: AnalysisCtx,
    /// 已清洗、过滤的评论
    pub reviews: Vec<RawReview>,
    pub resume: bool,
    pub limit: AnalysisLimit,
    pub batch_size: usize,
    /// 每累计多少条写一次进度
    pub periodic_interval: usize,
    pub prompt: String,
}

/// 定期保存的计数器
///
/// 累计条数每跨过一个 `interval` 的倍数触发一次
struct PeriodicSave {
    interval: usize,
    next: usize,
}

impl PeriodicSave {
    fn new(interval: usize, already: usize) -> Self {
        let interval = interval.max(1);
        Self {
            interval,
            next: (already / interval + 1) * interval,
        }
    }

    fn due(&mut self, count: usize) -> bool {
        if count < self.next {
            return false;
        }
        self.next = (count / self.interval + 1) * self.interval;
        true
    }
}

/// 评论分析流程
///
/// - 编排单个 (应用, 模型) 的分析
/// - 决定续跑范围、批量还是逐条
/// - 不关心抓取，也不关心有哪些应用
pub struct AnalysisEngine {
    store: CheckpointStore,
    parser: OutputParser,
    events: ProgressSink,
}

impl AnalysisEngine {
    /// 创建新的分析流程
    pub fn new(store: CheckpointStore, events: ProgressSink) -> Result<Self, AppError> {
        Ok(Self {
            store,
            parser: OutputParser::new()?,
            events,
        })
    }

    /// 执行分析，返回累计的全部结果（含已有结果）
    pub async fn analyse(
        &self,
        request: &AnalysisRequest,
        backend: &dyn AnalysisBackend,
        phase: &PhaseTracker,
        cancel: &CancellationToken,
    ) -> Vec<AnalysisRecord> {
        let ctx = &request.ctx;

        // ========== 1. 确定待分析范围 ==========
        let (mut accumulated, pending) = if request.resume {
            let existing = match self.store.load_existing_analysis(&ctx.item, ctx.model()) {
                Ok(existing) => existing,
                Err(e) => {
                    self.events
                        .warn(format!("{} 读取已有结果失败，从头开始: {}", ctx, e));
                    Vec::new()
                }
            };

            if request.limit.is_satisfied_by(existing.len()) {
                self.events.info(format!(
                    "Already complete for {}@{}: {} reviews",
                    ctx.item.name,
                    ctx.model(),
                    existing.len()
                ));
                return existing;
            }

            let (mut pending, done) = diff(&request.reviews, &existing);
            let remaining = match request.limit.remaining(existing.len()) {
                Some(remaining) => {
                    pending.truncate(remaining);
                    format!("{} to go", remaining)
                }
                None => format!("{} remaining", pending.len()),
            };
            if !existing.is_empty() {
                self.events.info(format!(
                    "Resuming {}@{}: {} done, {}",
                    ctx.item.name,
                    ctx.model(),
                    done.max(existing.len()),
                    remaining
                ));
            }
            (existing, pending)
        } else {
            let mut pending = request.reviews.clone();
            if let AnalysisLimit::Bounded(n) = request.limit {
                pending.truncate(n);
            }
            (Vec::new(), pending)
        };

        let total_target = match request.limit {
            AnalysisLimit::Bounded(n) => n,
            AnalysisLimit::Unlimited => accumulated.len() + pending.len(),
        };
        self.events
            .emit(ProgressEvent::ProgressReviewsTotal { value: total_target });
        self.events.info(format!(
            "Target: {} reviews, beginning analysis…",
            total_target
        ));

        let mut saver = PeriodicSave::new(request.periodic_interval, accumulated.len());

        // ========== 2. 批量或逐条 ==========
        let use_batch = request.batch_size > 1 && backend.supports_batch();
        self.events.info(format!(
            "Batch check: batch_size={}, supports_batch={}, can_batch={}",
            request.batch_size,
            backend.supports_batch(),
            use_batch
        ));

        if use_batch {
            self.run_batches(request, &pending, backend, phase, cancel, &mut accumulated, &mut saver)
                .await;
        } else {
            self.run_singles(request, pending, backend, cancel, &mut accumulated, &mut saver)
                .await;
        }

        // ========== 3. 收尾 ==========
        self.emit_current(ctx, accumulated.len());
        if !accumulated.is_empty() {
            self.save_progress(ctx, &accumulated);
        }
        self.events.info(format!(
            "Analysis complete: {}/{}",
            accumulated.len(),
            total_target
        ));

        accumulated
    }

    /// 分析单条评论
    pub async fn analyse_one(
        &self,
        review: RawReview,
        backend: &dyn AnalysisBackend,
        prompt: &str,
    ) -> ReviewOutcome {
        let text = review.text();
        let text = text.trim();
        if text.is_empty() {
            return ReviewOutcome::Skipped("评论正文为空".to_string());
        }

        match backend.analyze(text, prompt).await {
            Ok(raw) => {
                let judgements = self.parser.parse(&raw);
                ReviewOutcome::Analysed(AnalysisRecord::new(review, judgements, raw))
            }
            Err(e) => ReviewOutcome::Failed(e),
        }
    }

    async fn run_singles(
        &self,
        request: &AnalysisRequest,
        pending: Vec<RawReview>,
        backend: &dyn AnalysisBackend,
        cancel: &CancellationToken,
        accumulated: &mut Vec<AnalysisRecord>,
        saver: &mut PeriodicSave,
    ) {
        let ctx = &request.ctx;

        for review in pending {
            if cancel.is_cancelled() {
                self.events.info("Analysis stopped by user.");
                break;
            }
            self.emit_current(ctx, accumulated.len());

            let preview = truncate_text(&review.text(), 40);
            match self.analyse_one(review, backend, &request.prompt).await {
                ReviewOutcome::Analysed(record) => accumulated.push(record),
                ReviewOutcome::Skipped(reason) => {
                    debug!("{} 跳过评论: {}", ctx, reason);
                    continue;
                }
                ReviewOutcome::Failed(e) => {
                    self.events
                        .error(format!("Error analysing review \"{}\": {}", preview, e));
                    continue;
                }
            }

            if saver.due(accumulated.len()) {
                self.save_progress(ctx, accumulated);
                info!("Periodic save: {}", accumulated.len());
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_batches(
        &self,
        request: &AnalysisRequest,
        pending: &[RawReview],
        backend: &dyn AnalysisBackend,
        phase: &PhaseTracker,
        cancel: &CancellationToken,
        accumulated: &mut Vec<AnalysisRecord>,
        saver: &mut PeriodicSave,
    ) {
        let ctx = &request.ctx;
        let batch_size = request.batch_size;
        let total_batches = pending.len().div_ceil(batch_size);

        phase.change(
            Phase::BatchAnalysis,
            format!(
                "Switching to batch analysis mode: {} batches of up to {} reviews each",
                total_batches, batch_size
            ),
        );

        for (batch_idx, chunk) in pending.chunks(batch_size).enumerate() {
            let batch_no = batch_idx + 1;
            if cancel.is_cancelled() {
                self.events.info("Analysis stopped by user.");
                break;
            }
            self.events.info(format!(
                "Processing batch {}/{} ({} reviews)...",
                batch_no,
                total_batches,
                chunk.len()
            ));

            let texts: Vec<String> = chunk.iter().map(RawReview::text).collect();
            let raw = match backend.analyze_batch(&texts, &request.prompt).await {
                Ok(raw) if !raw.trim().is_empty() => raw,
                Ok(_) => {
                    self.events
                        .warn(format!("Batch {} returned no results, skipping", batch_no));
                    continue;
                }
                Err(e) => {
                    self.events
                        .warn(format!("Batch {} failed, skipping: {}", batch_no, e));
                    continue;
                }
            };

            let fragments = self.parser.split_batch(&raw);
            self.events.info(format!(
                "Batch response split into {} parts",
                fragments.len()
            ));

            let mut processed = 0;
            for (idx, fragment) in fragments.iter().enumerate() {
                let Some(review) = chunk.get(idx) else {
                    self.events.warn(format!(
                        "More response blocks than input reviews: {} > {}",
                        fragments.len(),
                        chunk.len()
                    ));
                    break;
                };
                if fragment.is_empty() {
                    self.events
                        .warn(format!("Empty response block {}, skipping", idx + 1));
                    continue;
                }

                let judgements = self.parser.parse(fragment);
                accumulated.push(AnalysisRecord::new(
                    review.clone(),
                    judgements,
                    fragment.to_string(),
                ));
                processed += 1;
                self.emit_current(ctx, accumulated.len());
            }

            if fragments.len() < chunk.len() {
                self.events.warn(format!(
                    "Batch {} returned {} response blocks for {} reviews; the rest stay pending",
                    batch_no,
                    fragments.len(),
                    chunk.len()
                ));
            }
            self.events.info(format!(
                "Completed batch {}/{} ({}/{} reviews processed)",
                batch_no,
                total_batches,
                processed,
                chunk.len()
            ));

            if saver.due(accumulated.len()) {
                self.save_progress(ctx, accumulated);
                info!("Periodic save: {}", accumulated.len());
            }
        }
    }

    fn emit_current(&self, ctx: &AnalysisCtx, value: usize) {
        self.events.emit(ProgressEvent::ProgressReviewsCurrent {
            value,
            provider: ctx.pair.provider.clone(),
            model: ctx.pair.model.clone(),
        });
    }

    fn save_progress(&self, ctx: &AnalysisCtx, records: &[AnalysisRecord]) {
        if let Err(e) = self
            .store
            .save_analysis_progress(&ctx.item, ctx.model(), records)
        {
            self.events
                .error(format!("{} 写入分析进度失败: {}", ctx, e));
        }
    }
}
