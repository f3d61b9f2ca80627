//! 评论抓取服务 - 业务能力层
//!
//! 按游标分页拉取评论，对失败分类退避，完整模式下定期写检查点。
//! 只依赖 [`ReviewFeed`] 能力，不关心评论来自哪里。

use crate::clients::ReviewFeed;
use crate::config::FetchingConfig;
use crate::models::{ProgressEvent, ProgressSink, RawReview};
use crate::utils::logging::{format_elapsed, log_crawl_summary};
use crate::utils::pause;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 抓取参数
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// 有限模式的目标评论数
    pub target: usize,
    /// 有限模式的请求上限
    pub max_requests: usize,
    /// 完整模式的请求上限
    pub complete_max_requests: usize,
    /// 完整模式下每累计多少条写一次检查点，0 表示不写
    pub checkpoint_interval: usize,
    pub max_empty_batches: u32,
    pub max_same_cursor: u32,
    pub max_consecutive_errors: u32,
    pub max_total_errors: usize,
    /// 退避基础单位，也是一般错误的固定等待时间
    pub backoff_unit: Duration,
    /// 空页但游标前进时的等待
    pub empty_advance_pause: Duration,
    /// 游标未变化时的等待
    pub same_cursor_pause: Duration,
    /// 有限模式每页之间的间隔
    pub bounded_pace: Duration,
    /// 完整模式每页之间的间隔
    pub complete_pace: Duration,
    /// 累计错误较多时的间隔
    pub slow_pace: Duration,
    /// 累计错误超过该值后使用 `slow_pace`
    pub slow_after_errors: usize,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            target: 100,
            max_requests: 5,
            complete_max_requests: 2000,
            checkpoint_interval: 100,
            max_empty_batches: 3,
            max_same_cursor: 3,
            max_consecutive_errors: 5,
            max_total_errors: 20,
            backoff_unit: Duration::from_secs(5),
            empty_advance_pause: Duration::from_secs(2),
            same_cursor_pause: Duration::from_secs(3),
            bounded_pace: Duration::from_millis(500),
            complete_pace: Duration::from_millis(1500),
            slow_pace: Duration::from_secs(3),
            slow_after_errors: 5,
        }
    }
}

impl CrawlSettings {
    pub fn from_config(fetching: &FetchingConfig) -> Self {
        Self {
            target: fetching.reviews_per_app,
            max_requests: fetching.max_requests_per_app,
            complete_max_requests: fetching.complete_max_requests,
            checkpoint_interval: fetching.checkpoint_interval,
            ..Self::default()
        }
    }

    /// 所有等待时间置零
    pub fn without_delays(self) -> Self {
        Self {
            backoff_unit: Duration::ZERO,
            empty_advance_pause: Duration::ZERO,
            same_cursor_pause: Duration::ZERO,
            bounded_pace: Duration::ZERO,
            complete_pace: Duration::ZERO,
            slow_pace: Duration::ZERO,
            ..self
        }
    }
}

/// 抓取结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStop {
    TargetReached,
    RequestCeiling,
    Cancelled,
    EmptyBatches,
    CursorStalled,
    ConsecutiveErrors,
    TotalErrors,
    NoCursor,
}

/// 抓取结果
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub reviews: Vec<RawReview>,
    pub requests: usize,
    pub total_errors: usize,
    pub stop: CrawlStop,
}

/// 评论抓取服务
pub struct ReviewCrawler {
    feed: Arc<dyn ReviewFeed>,
    settings: CrawlSettings,
    events: ProgressSink,
}

impl ReviewCrawler {
    pub fn new(feed: Arc<dyn ReviewFeed>, settings: CrawlSettings, events: ProgressSink) -> Self {
        Self {
            feed,
            settings,
            events,
        }
    }

    /// 抓取一个应用的评论
    ///
    /// # 参数
    /// - `app_id`: 应用 ID
    /// - `complete`: 是否完整抓取（不限条数）
    /// - `cancel`: 停止信号，只打断等待，不打断进行中的请求
    /// - `checkpoint`: 完整模式下累计条数跨过检查点间隔时调用
    pub async fn fetch<F>(
        &self,
        app_id: u32,
        complete: bool,
        cancel: &CancellationToken,
        mut checkpoint: F,
    ) -> CrawlReport
    where
        F: FnMut(&[RawReview], u32) + Send,
    {
        let s = &self.settings;
        let started = Instant::now();
        let target = (!complete).then_some(s.target);
        let ceiling = if complete {
            s.complete_max_requests
        } else {
            s.max_requests
        };

        let mut reviews: Vec<RawReview> = Vec::new();
        let mut cursor = "*".to_string();
        let mut requests = 0usize;
        let mut empty_batches = 0u32;
        let mut same_cursor = 0u32;
        let mut consecutive_errors = 0u32;
        let mut total_errors = 0usize;
        let mut next_checkpoint = s.checkpoint_interval;

        let stop = loop {
            if target.is_some_and(|t| reviews.len() >= t) {
                break CrawlStop::TargetReached;
            }
            if requests >= ceiling {
                break CrawlStop::RequestCeiling;
            }
            if cancel.is_cancelled() {
                self.events
                    .info(format!("收到停止信号，应用 {} 的抓取已中止", app_id));
                break CrawlStop::Cancelled;
            }
            if empty_batches >= s.max_empty_batches {
                break CrawlStop::EmptyBatches;
            }
            if consecutive_errors >= s.max_consecutive_errors {
                warn!("⚠️ 应用 {} 连续失败 {} 次，停止抓取", app_id, consecutive_errors);
                break CrawlStop::ConsecutiveErrors;
            }
            if total_errors >= s.max_total_errors {
                warn!("⚠️ 应用 {} 累计失败 {} 次，停止抓取", app_id, total_errors);
                break CrawlStop::TotalErrors;
            }

            requests += 1;
            debug!("应用 {} 第 {} 次请求，游标: {}", app_id, requests, cursor);

            let page = match self.feed.fetch_page(app_id, &cursor).await {
                Ok(page) => page,
                Err(e) => {
                    consecutive_errors += 1;
                    total_errors += 1;
                    let wait = e.backoff(consecutive_errors, s.backoff_unit);
                    warn!(
                        "❌ 应用 {} 第 {} 次请求失败: {}，等待 {:?} 后重试",
                        app_id, requests, e, wait
                    );
                    pause(wait, cancel).await;
                    continue;
                }
            };
            consecutive_errors = 0;

            if page.reviews.is_empty() {
                empty_batches += 1;
                debug!("应用 {} 第 {} 个空页", app_id, empty_batches);

                if !complete || empty_batches >= s.max_empty_batches {
                    break CrawlStop::EmptyBatches;
                }
                match page.cursor {
                    Some(next) if next != cursor => {
                        cursor = next;
                        same_cursor = 0;
                        pause(s.empty_advance_pause, cancel).await;
                    }
                    _ => {
                        same_cursor += 1;
                        if same_cursor >= s.max_same_cursor {
                            break CrawlStop::CursorStalled;
                        }
                        pause(s.same_cursor_pause, cancel).await;
                    }
                }
                continue;
            }
            empty_batches = 0;

            let batch_len = page.reviews.len();
            reviews.extend(page.reviews);

            if complete && s.checkpoint_interval > 0 && reviews.len() >= next_checkpoint {
                checkpoint(&reviews, app_id);
                next_checkpoint = (reviews.len() / s.checkpoint_interval + 1) * s.checkpoint_interval;
            }

            match page.cursor {
                None => break CrawlStop::NoCursor,
                Some(next) if next == cursor => {
                    same_cursor += 1;
                    if same_cursor >= s.max_same_cursor {
                        break CrawlStop::CursorStalled;
                    }
                    pause(s.same_cursor_pause, cancel).await;
                }
                Some(next) => {
                    cursor = next;
                    same_cursor = 0;
                }
            }

            self.events.emit(ProgressEvent::ScrapingProgress {
                app_id,
                reviews_scraped: reviews.len(),
                elapsed_time: format_elapsed(started.elapsed()),
                is_complete_scraping: complete,
                total_errors,
            });
            debug!(
                "应用 {} 第 {} 页: {} 条，累计 {} 条",
                app_id,
                requests,
                batch_len,
                reviews.len()
            );

            let pace = match (complete, total_errors > s.slow_after_errors) {
                (false, _) => s.bounded_pace,
                (true, true) => s.slow_pace,
                (true, false) => s.complete_pace,
            };
            pause(pace, cancel).await;
        };

        if let Some(t) = target {
            reviews.truncate(t);
        }

        let elapsed = started.elapsed();
        log_crawl_summary(app_id, reviews.len(), requests, total_errors, elapsed);
        let message = if complete {
            format!(
                "Complete scrape finished for app {}: {} reviews in {} (Total errors: {})",
                app_id,
                reviews.len(),
                format_elapsed(elapsed),
                total_errors
            )
        } else {
            format!(
                "Limited scrape finished for app {}: {} reviews in {} requests (Total errors: {})",
                app_id,
                reviews.len(),
                requests,
                total_errors
            )
        };
        self.events.info(message);

        CrawlReport {
            reviews,
            requests,
            total_errors,
            stop,
        }
    }
}
