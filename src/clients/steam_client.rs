/// Steam 评论 API 客户端
///
/// 封装所有与 Steam 商店接口相关的调用逻辑，爬虫只依赖 [`ReviewFeed`] 能力
use crate::error::FeedError;
use crate::models::RawReview;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

const STORE_URL: &str = "https://store.steampowered.com";
const API_URL: &str = "https://api.steampowered.com";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 一页评论
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub reviews: Vec<RawReview>,
    /// 下一页游标，None 表示没有更多
    pub cursor: Option<String>,
}

/// 评论数据源能力
#[async_trait]
pub trait ReviewFeed: Send + Sync {
    /// 拉取一页评论
    async fn fetch_page(&self, app_id: u32, cursor: &str) -> Result<FeedPage, FeedError>;

    /// 查询应用名称
    async fn resolve_name(&self, app_id: u32) -> String {
        unknown_app_name(app_id)
    }
}

/// 未知应用的显示名称
pub fn unknown_app_name(app_id: u32) -> String {
    format!("Unknown App (ID: {})", app_id)
}

/// 应用名称目录
///
/// 首次查询时拉取全量列表，之后整个进程复用。只缓存成功的拉取，失败时下次查询重试
#[derive(Debug)]
pub struct AppCatalog {
    list_url: String,
    names: OnceCell<HashMap<u32, String>>,
}

impl Default for AppCatalog {
    fn default() -> Self {
        Self::with_url(format!("{}/ISteamApps/GetAppList/v2/", API_URL))
    }
}

impl AppCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从指定地址拉取应用列表
    pub fn with_url(list_url: impl Into<String>) -> Self {
        Self {
            list_url: list_url.into(),
            names: OnceCell::new(),
        }
    }

    /// 用已知列表创建（不会再发起请求）
    pub fn preloaded(names: HashMap<u32, String>) -> Self {
        Self {
            names: OnceCell::new_with(Some(names)),
            ..Self::default()
        }
    }

    /// 是否已缓存应用列表
    pub fn is_loaded(&self) -> bool {
        self.names.initialized()
    }

    async fn names(&self, http: &reqwest::Client) -> Result<&HashMap<u32, String>, FeedError> {
        self.names
            .get_or_try_init(|| async {
                info!("🔍 首次拉取 Steam 应用列表...");
                let names = fetch_app_list(http, &self.list_url).await?;
                info!("✓ 已缓存 {} 个应用名称", names.len());
                Ok::<_, FeedError>(names)
            })
            .await
    }

    pub async fn name_of(&self, http: &reqwest::Client, app_id: u32) -> String {
        match self.names(http).await {
            Ok(names) => names
                .get(&app_id)
                .cloned()
                .unwrap_or_else(|| unknown_app_name(app_id)),
            Err(e) => {
                error!("❌ 拉取 Steam 应用列表失败: {}", e);
                unknown_app_name(app_id)
            }
        }
    }
}

async fn fetch_app_list(http: &reqwest::Client, url: &str) -> Result<HashMap<u32, String>, FeedError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| FeedError::Transport(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(FeedError::Http {
            status: status.as_u16(),
        });
    }
    let body: Value = response
        .json()
        .await
        .map_err(|e| FeedError::Decode(e.to_string()))?;

    Ok(parse_app_list(&body))
}

/// 解析 `applist.apps` 列表
pub fn parse_app_list(body: &Value) -> HashMap<u32, String> {
    body.pointer("/applist/apps")
        .and_then(Value::as_array)
        .map(|apps| {
            apps.iter()
                .filter_map(|app| {
                    let id = app.get("appid")?.as_u64()?;
                    let name = app.get("name")?.as_str()?;
                    Some((u32::try_from(id).ok()?, name.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// 解析一页评论响应
///
/// `success != 1` 视为失败；非对象的评论条目被丢弃
pub fn parse_review_page(body: Value) -> Result<FeedPage, FeedError> {
    let code = body.get("success").and_then(Value::as_i64).unwrap_or(0);
    if code != 1 {
        return Err(FeedError::Unsuccessful { code });
    }

    let cursor = body
        .get("cursor")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    let reviews = match body {
        Value::Object(mut map) => match map.remove("reviews") {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| {
                    let review = RawReview::from_value(item);
                    if review.is_none() {
                        warn!("⚠️ 跳过非对象的评论条目");
                    }
                    review
                })
                .collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    Ok(FeedPage { reviews, cursor })
}

/// Steam 评论数据源
pub struct SteamReviewFeed {
    http: reqwest::Client,
    language: String,
    catalog: AppCatalog,
}

impl SteamReviewFeed {
    /// 创建新的 Steam 客户端
    ///
    /// # 参数
    /// - `language`: 评论语言过滤（`all` 表示不过滤）
    pub fn new(language: impl Into<String>) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            language: language.into(),
            catalog: AppCatalog::new(),
        })
    }
}

#[async_trait]
impl ReviewFeed for SteamReviewFeed {
    async fn fetch_page(&self, app_id: u32, cursor: &str) -> Result<FeedPage, FeedError> {
        debug!("请求应用 {} 的评论，游标: {}", app_id, cursor);

        let response = self
            .http
            .get(format!("{}/appreviews/{}", STORE_URL, app_id))
            .query(&[
                ("json", "1"),
                ("filter", "recent"),
                ("language", self.language.as_str()),
                ("num_per_page", "100"),
                ("cursor", cursor),
            ])
            .send()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            502 | 503 => return Err(FeedError::Overloaded { status }),
            429 => return Err(FeedError::RateLimited),
            s if !(200..300).contains(&s) => return Err(FeedError::Http { status }),
            _ => {}
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))?;

        parse_review_page(body)
    }

    async fn resolve_name(&self, app_id: u32) -> String {
        self.catalog.name_of(&self.http, app_id).await
    }
}
