//! 集成测试共用的内存替身
#![allow(dead_code)]

use async_trait::async_trait;
use review_analyser::clients::{AnalysisBackend, BackendFactory, FeedPage, ReviewFeed};
use review_analyser::config::Config;
use review_analyser::error::{BackendError, FeedError};
use review_analyser::models::{Construct, ProgressEvent, ProviderModelPair, RawReview};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

/// 第 `i` 条测试评论
pub fn review(i: usize) -> RawReview {
    let value = json!({
        "recommendationid": format!("{}", 9000 + i),
        "review": format!("Review number {} talks about the game at some length", i),
        "timestamp_created": 1_700_000_000 + i as i64,
        "voted_up": true,
        "author": {
            "steamid": format!("7656119{:04}", i),
            "playtime_forever": 600,
        },
    });
    RawReview::from_value(value).expect("测试评论应为对象")
}

pub fn reviews(n: usize) -> Vec<RawReview> {
    (0..n).map(review).collect()
}

pub fn drain(rx: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ========== 数据源 ==========

/// 按游标偏移生成评论的数据源，翻到末尾后返回空页且游标不变
pub struct GeneratedFeed {
    pub total: usize,
    pub per_page: usize,
    pub name: String,
    pub requests: AtomicUsize,
}

impl GeneratedFeed {
    pub fn new(total: usize, per_page: usize) -> Self {
        Self {
            total,
            per_page,
            name: "Test Game".to_string(),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReviewFeed for GeneratedFeed {
    async fn fetch_page(&self, _app_id: u32, cursor: &str) -> Result<FeedPage, FeedError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let offset: usize = cursor.trim_start_matches('c').parse().unwrap_or(0);
        let end = (offset + self.per_page).min(self.total);
        let reviews: Vec<RawReview> = (offset..end.max(offset)).map(review).collect();
        Ok(FeedPage {
            cursor: Some(format!("c{}", offset + reviews.len())),
            reviews,
        })
    }

    async fn resolve_name(&self, _app_id: u32) -> String {
        self.name.clone()
    }
}

/// 按预设顺序返回结果的数据源，用完后返回无游标的空页
pub struct ScriptedFeed {
    responses: Mutex<VecDeque<Result<FeedPage, FeedError>>>,
    pub requests: AtomicUsize,
}

impl ScriptedFeed {
    pub fn new(responses: Vec<Result<FeedPage, FeedError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReviewFeed for ScriptedFeed {
    async fn fetch_page(&self, _app_id: u32, _cursor: &str) -> Result<FeedPage, FeedError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().expect("锁").pop_front();
        next.unwrap_or_else(|| Ok(FeedPage::default()))
    }
}

pub fn page(range: std::ops::Range<usize>, cursor: &str) -> Result<FeedPage, FeedError> {
    Ok(FeedPage {
        reviews: range.map(review).collect(),
        cursor: Some(cursor.to_string()),
    })
}

// ========== 分析后端 ==========

/// 单条评论的模型输出：能力满足为真，引文即评论正文
pub fn canned_output(text: &str) -> String {
    let mut out = String::new();
    for construct in Construct::ALL {
        if construct == Construct::CompetenceSatisfaction {
            out.push_str(&format!("{}: TRUE\n", construct.key()));
            out.push_str(&format!("{} QUOTE: \"{}\"\n", construct.key(), text));
        } else {
            out.push_str(&format!("{}: FALSE\n", construct.key()));
            out.push_str(&format!("{} QUOTE: N/A\n", construct.key()));
        }
    }
    out
}

/// 内存分析后端
pub struct FakeBackend {
    pub calls: AtomicUsize,
    pub batch: bool,
    /// 批量时最多返回多少个分段
    pub max_fragments: usize,
    /// 批量时在末尾多返回的分段数
    pub extra_fragments: usize,
    /// 累计调用到该次数后触发停止
    pub cancel_after: Option<(usize, CancellationToken)>,
    /// 第几次调用（从 1 开始）返回错误
    pub fail_calls: Vec<usize>,
    /// 每次调用前的等待
    pub delay: Duration,
    /// 调用时直接 panic
    pub panics: bool,
}

impl FakeBackend {
    pub fn single() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            batch: false,
            max_fragments: usize::MAX,
            extra_fragments: 0,
            cancel_after: None,
            fail_calls: Vec::new(),
            delay: Duration::ZERO,
            panics: false,
        }
    }

    pub fn batched(max_fragments: usize) -> Self {
        Self {
            batch: true,
            max_fragments,
            ..Self::single()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn record_call(&self) -> Result<(), BackendError> {
        if self.panics {
            panic!("后端实现出错");
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if calls >= *after {
                token.cancel();
            }
        }
        if self.fail_calls.contains(&calls) {
            return Err(BackendError::EmptyResponse {
                provider: "fake".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AnalysisBackend for FakeBackend {
    async fn analyze(&self, text: &str, _prompt: &str) -> Result<String, BackendError> {
        self.record_call().await?;
        Ok(canned_output(text))
    }

    async fn analyze_batch(&self, texts: &[String], _prompt: &str) -> Result<String, BackendError> {
        self.record_call().await?;
        let mut out = String::from("Here are the analyses.\n\n");
        let mut blocks = 0;
        for text in texts.iter().take(self.max_fragments) {
            blocks += 1;
            out.push_str(&format!("Review {} Analysis:\n{}\n", blocks, canned_output(text)));
        }
        for _ in 0..self.extra_fragments {
            blocks += 1;
            out.push_str(&format!("Review {} Analysis:\n{}\n", blocks, canned_output("extra")));
        }
        Ok(out)
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }
}

/// 每次都创建新的单条后端，并记录创建次数
#[derive(Default)]
pub struct FakeFactory {
    pub created: AtomicUsize,
    pub fail: bool,
    /// 创建出的后端调用时 panic
    pub panics: bool,
    /// 创建出的后端每次调用前等待
    pub delay: Duration,
}

impl FakeFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl BackendFactory for FakeFactory {
    fn create(
        &self,
        _config: &Config,
        pair: &ProviderModelPair,
        _cancel: &CancellationToken,
    ) -> Result<Arc<dyn AnalysisBackend>, BackendError> {
        if self.fail {
            return Err(BackendError::Unavailable {
                provider: pair.provider.clone(),
                reason: "API key not configured".to_string(),
            });
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeBackend {
            panics: self.panics,
            delay: self.delay,
            ..FakeBackend::single()
        }))
    }
}
