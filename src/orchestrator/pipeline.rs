//! 单次运行流水线 - 编排层
//!
//! ## 职责
//!
//! 一次运行（抓取或分析）从开始到结束的全部调度：
//!
//! 1. **前置检查**：应用列表、模型组合、跳过抓取时的原始评论文件
//! 2. **逐个应用**：抓取或复用原始评论 → 清洗 → 过滤
//! 3. **逐个模型**：预检查 → 创建后端 → 委托 `AnalysisEngine` → 保存最终结果
//! 4. **收尾**：无论成功、停止还是出错，都报告阶段结束并回到空闲
//!
//! 不做具体业务判断，只做调度和事件上报。

use crate::clients::{BackendFactory, ReviewFeed};
use crate::config::Config;
use crate::error::{AppError, AppResult, ConfigError};
use crate::models::{
    AnalysisLimit, Phase, ProgressEvent, ProgressSink, ProviderModelPair, RawReview, WorkItem,
};
use crate::orchestrator::PhaseTracker;
use crate::services::{clean, filter_reviews, CheckpointStore, CrawlSettings, ReviewCrawler};
use crate::utils::logging::{log_app_start, log_run_finished, log_run_start};
use crate::workflow::{AnalysisCtx, AnalysisEngine, AnalysisRequest};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// 运行类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// 只抓取
    Scraping,
    /// 抓取（或复用）并分析
    Analysis,
}

impl RunKind {
    fn noun(self) -> &'static str {
        match self {
            RunKind::Scraping => "Scraping",
            RunKind::Analysis => "Analysis",
        }
    }
}

/// 单次运行的参数覆盖，随运行结束而丢弃
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub complete_scraping: Option<bool>,
    pub skip_scraping: Option<bool>,
    pub reviews_to_analyze: Option<usize>,
}

impl RunOverrides {
    pub fn complete_scraping(&self, config: &Config) -> bool {
        self.complete_scraping
            .unwrap_or(config.fetching.enable_complete_scraping)
    }

    pub fn skip_scraping(&self, config: &Config) -> bool {
        self.skip_scraping.unwrap_or(config.analysis.skip_scraping)
    }

    /// 完整抓取时分析全部评论，否则按上限
    pub fn limit(&self, config: &Config) -> AnalysisLimit {
        if self.complete_scraping(config) {
            AnalysisLimit::Unlimited
        } else {
            AnalysisLimit::Bounded(
                self.reviews_to_analyze
                    .unwrap_or(config.analysis.reviews_to_analyze),
            )
        }
    }
}

/// 单次运行流水线
///
/// 由编排器在启动运行时创建，整体移入后台任务
pub struct Pipeline {
    config: Config,
    overrides: RunOverrides,
    feed: Arc<dyn ReviewFeed>,
    backends: Arc<dyn BackendFactory>,
    crawler: ReviewCrawler,
    store: CheckpointStore,
    events: ProgressSink,
    tracker: PhaseTracker,
    cancel: CancellationToken,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        overrides: RunOverrides,
        feed: Arc<dyn ReviewFeed>,
        backends: Arc<dyn BackendFactory>,
        crawl_settings: CrawlSettings,
        events: ProgressSink,
        tracker: PhaseTracker,
        cancel: CancellationToken,
    ) -> Self {
        let crawler = ReviewCrawler::new(feed.clone(), crawl_settings, events.clone());
        let store = CheckpointStore::new(&config.file_paths);
        Self {
            config,
            overrides,
            feed,
            backends,
            crawler,
            store,
            events,
            tracker,
            cancel,
        }
    }

    /// 执行一次运行并收尾
    pub async fn run(self, kind: RunKind) {
        let result = match kind {
            RunKind::Scraping => self.run_scraping().await,
            RunKind::Analysis => self.run_analysis().await,
        };

        if let Err(e) = result {
            if e.is_precondition() {
                self.events.error(format!("Cannot start: {}", e));
            } else {
                self.events.error(format!("Error: {}", e));
            }
        }

        let stopped = self.cancel.is_cancelled();
        let message = if stopped {
            format!("{} stopped. All progress has been saved.", kind.noun())
        } else {
            format!("{} complete.", kind.noun())
        };
        self.events.info(message);
        log_run_finished(stopped);

        self.tracker.finish();
        self.events.emit(ProgressEvent::AnalysisFinished);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn work_items(&self) -> AppResult<Vec<WorkItem>> {
        if self.config.app_ids.is_empty() {
            return Err(ConfigError::NoWorkItems.into());
        }
        let mut items = Vec::with_capacity(self.config.app_ids.len());
        for &app_id in &self.config.app_ids {
            let name = self.feed.resolve_name(app_id).await;
            items.push(WorkItem::new(app_id, name));
        }
        Ok(items)
    }

    // ========== 只抓取 ==========

    async fn run_scraping(&self) -> AppResult<()> {
        let complete = self.overrides.complete_scraping(&self.config);
        let mode = if complete { "complete" } else { "limited" };

        self.tracker
            .start(Phase::Scraping, "Starting scraping process...");
        self.events
            .info(format!("Starting {} review scraping...", mode));

        let items = self.work_items().await?;
        log_run_start(&format!("{} scraping", mode), items.len(), 0);
        self.events
            .emit(ProgressEvent::ProgressAppsTotal { value: items.len() });

        for (index, item) in items.iter().enumerate() {
            if self.is_cancelled() {
                break;
            }
            self.events
                .emit(ProgressEvent::ProgressAppsCurrent { value: index });
            log_app_start(index + 1, items.len(), &item.name, item.app_id);
            self.events.emit(ProgressEvent::StatusUpdate {
                app: item.name.clone(),
                model: None,
            });
            self.events
                .info(format!("Starting {} scraping for: {}", mode, item));

            let reviews = self.crawl(item, complete).await;
            if reviews.is_empty() {
                self.events
                    .warn(format!("No reviews found for {}", item.name));
            }
        }

        self.events
            .emit(ProgressEvent::ProgressAppsCurrent { value: items.len() });
        Ok(())
    }

    /// 抓取并保存原始评论；完整模式下定期写进度文件
    async fn crawl(&self, item: &WorkItem, complete: bool) -> Vec<RawReview> {
        let store = &self.store;
        let events = &self.events;
        let report = self
            .crawler
            .fetch(item.app_id, complete, &self.cancel, |snapshot, _| {
                if let Err(e) = store.save_raw_progress(item, snapshot) {
                    events.error(format!("Periodic save failed for {}: {}", item, e));
                }
            })
            .await;
        debug!("应用 {} 抓取结束原因: {:?}", item.app_id, report.stop);

        if !report.reviews.is_empty() {
            match store.save_raw(item, &report.reviews) {
                Ok(_) => {
                    store.remove_raw_progress(item);
                    self.events.info(format!(
                        "Saved {} reviews for {}",
                        report.reviews.len(),
                        item.name
                    ));
                }
                Err(e) => self
                    .events
                    .error(format!("Failed to save raw reviews for {}: {}", item, e)),
            }
        }
        report.reviews
    }

    // ========== 分析 ==========

    async fn run_analysis(&self) -> AppResult<()> {
        let complete = self.overrides.complete_scraping(&self.config);
        let skip = self.overrides.skip_scraping(&self.config);
        let limit = self.overrides.limit(&self.config);

        let (first_phase, workflow) = match (skip, complete) {
            (true, _) => (
                Phase::Analysis,
                "analysis-only (using existing raw reviews)",
            ),
            (false, true) => (Phase::Scraping, "complete analysis workflow"),
            (false, false) => (Phase::Scraping, "limited analysis workflow"),
        };
        self.tracker
            .start(first_phase, format!("Starting {}...", workflow));

        let items = self.work_items().await?;
        let pairs = self.config.selected_pairs();
        if pairs.is_empty() {
            return Err(ConfigError::NoModelsSelected.into());
        }
        if skip {
            self.ensure_raw_reviews(&items)?;
        }

        log_run_start(workflow, items.len(), pairs.len());
        let prompt = self.config.load_prompt();
        let engine = AnalysisEngine::new(self.store.clone(), self.events.clone())?;
        let models: Vec<String> = pairs.iter().map(|p| p.model.clone()).collect();

        self.events
            .emit(ProgressEvent::ProgressAppsTotal { value: items.len() });

        for (index, item) in items.iter().enumerate() {
            if self.is_cancelled() {
                break;
            }
            self.events
                .emit(ProgressEvent::ProgressAppsCurrent { value: index });
            log_app_start(index + 1, items.len(), &item.name, item.app_id);
            self.events.info(format!("Processing app: {}", item));

            let reviews = self.obtain_reviews(item, skip, complete).await;
            if reviews.is_empty() {
                self.events
                    .warn(format!("No reviews found for {}. Skipping.", item.name));
                continue;
            }

            let reviews = filter_reviews(clean(reviews), &self.config.filtering);
            if reviews.is_empty() {
                self.events.warn(format!(
                    "No valid reviews after cleaning and filtering for {}. Skipping.",
                    item.name
                ));
                continue;
            }

            for pair in &pairs {
                if self.is_cancelled() {
                    break;
                }
                self.analyse_pair(&engine, item, pair, &reviews, limit, &prompt)
                    .await;
            }

            if !self.is_cancelled() {
                match self.store.write_summary(item, &models) {
                    Ok(_) => self
                        .events
                        .info(format!("Generated summary report for {}", item.name)),
                    Err(e) => self.events.error(format!(
                        "Failed to generate summary for {}: {}",
                        item.name, e
                    )),
                }
            }
        }

        self.events
            .emit(ProgressEvent::ProgressAppsCurrent { value: items.len() });
        Ok(())
    }

    /// 跳过抓取时要求每个应用都已有原始评论文件
    fn ensure_raw_reviews(&self, items: &[WorkItem]) -> AppResult<()> {
        let availability = self.store.raw_availability(items);
        self.events.info(format!(
            "Raw reviews available for {}/{} apps ({} reviews)",
            availability.apps_with_reviews, availability.total_apps, availability.total_reviews
        ));

        let missing: Vec<String> = availability
            .app_details
            .iter()
            .filter(|entry| !entry.has_reviews)
            .map(|entry| format!("{} (ID: {})", entry.app_name, entry.app_id))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let list = missing.join(", ");
        self.events.error(format!(
            "❌ Cannot skip scraping - No raw reviews found for: {}",
            list
        ));
        self.events
            .info("💡 Scrape the missing apps first, or run the analysis without skipping scraping");
        self.events.emit(ProgressEvent::MissingRawReviews {
            missing_apps: missing,
        });
        Err(AppError::missing_raw_reviews(list))
    }

    /// 优先复用已有原始评论文件，否则抓取
    async fn obtain_reviews(&self, item: &WorkItem, skip: bool, complete: bool) -> Vec<RawReview> {
        if self.store.raw_exists(item) {
            match self.store.load_raw(item) {
                Ok(reviews) => {
                    self.events.info(format!(
                        "Using existing raw reviews for {}: {} reviews",
                        item.name,
                        reviews.len()
                    ));
                    return reviews;
                }
                Err(e) => {
                    error!("读取原始评论失败: {}", e);
                    self.events.error(format!(
                        "Error loading existing raw reviews for {}: {}",
                        item.name, e
                    ));
                    if skip {
                        return Vec::new();
                    }
                }
            }
        } else if skip {
            self.events.error(format!(
                "No existing raw reviews found for {}",
                item.name
            ));
            return Vec::new();
        }

        self.tracker
            .change(Phase::Scraping, Phase::Scraping.announcement());
        self.crawl(item, complete).await
    }

    /// 用一个 (后端, 模型) 组合分析一个应用
    async fn analyse_pair(
        &self,
        engine: &AnalysisEngine,
        item: &WorkItem,
        pair: &ProviderModelPair,
        reviews: &[RawReview],
        limit: AnalysisLimit,
        prompt: &str,
    ) {
        self.tracker
            .change(Phase::Analysis, Phase::Analysis.announcement());
        self.events.emit(ProgressEvent::StatusUpdate {
            app: item.name.clone(),
            model: Some(pair.model.clone()),
        });

        // 最终文件已满足上限时不创建后端
        if let (AnalysisLimit::Bounded(target), Some(count)) =
            (limit, self.store.final_analysis_count(item, &pair.model))
        {
            if count >= target {
                self.events.info(format!(
                    "Analysis already complete for {} with {} ({} reviews, target: {})",
                    item.name, pair.model, count, target
                ));
                return;
            }
            self.events.info(format!(
                "Analysis partially complete for {} with {} ({} reviews, target: {}). Continuing analysis...",
                item.name, pair.model, count, target
            ));
        }

        let backend = match self.backends.create(&self.config, pair, &self.cancel) {
            Ok(backend) => backend,
            Err(e) => {
                self.events
                    .error(format!("Skipping {} for {}: {}", pair, item.name, e));
                return;
            }
        };

        self.events.info(format!(
            "Analyzing {} filtered reviews for {} with {}",
            reviews.len(),
            item.name,
            pair.model
        ));

        let request = AnalysisRequest {
            ctx: AnalysisCtx::new(item.clone(), pair.clone()),
            reviews: reviews.to_vec(),
            resume: self.config.analysis.enable_resume,
            limit,
            batch_size: self.config.analysis.api_batch_size,
            periodic_interval: self.config.analysis.periodic_save_interval,
            prompt: prompt.to_string(),
        };
        let records = engine
            .analyse(&request, backend.as_ref(), &self.tracker, &self.cancel)
            .await;

        if records.is_empty() {
            self.events.warn(format!(
                "No analysed data returned for {} with {}",
                item.name, pair.model
            ));
            return;
        }

        match self.store.save_analysis(item, &pair.model, &records) {
            Ok(_) => {
                self.store.cleanup_analysis_progress(item, &pair.model);
                self.events.info(format!(
                    "Completed analysis of {} reviews with {}",
                    records.len(),
                    pair.model
                ));
            }
            Err(e) => self.events.error(format!(
                "Failed to save analysis for {} with {}: {}",
                item.name, pair.model, e
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_fall_back_to_config() {
        let mut config = Config::default();
        config.analysis.reviews_to_analyze = 40;
        config.analysis.skip_scraping = true;

        let overrides = RunOverrides::default();
        assert!(!overrides.complete_scraping(&config));
        assert!(overrides.skip_scraping(&config));
        assert_eq!(overrides.limit(&config), AnalysisLimit::Bounded(40));

        let overrides = RunOverrides {
            skip_scraping: Some(false),
            reviews_to_analyze: Some(7),
            ..Default::default()
        };
        assert!(!overrides.skip_scraping(&config));
        assert_eq!(overrides.limit(&config), AnalysisLimit::Bounded(7));
    }

    #[test]
    fn test_complete_scraping_lifts_limit() {
        let config = Config::default();
        let overrides = RunOverrides {
            complete_scraping: Some(true),
            reviews_to_analyze: Some(5),
            ..Default::default()
        };
        assert_eq!(overrides.limit(&config), AnalysisLimit::Unlimited);
    }
}
