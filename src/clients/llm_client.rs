//! LLM 分析后端
//!
//! ## 技术栈
//! - OpenAI 使用 `async-openai` crate
//! - Ollama / Gemini / Claude 直接用 `reqwest` 调用 HTTP 接口
//!
//! 每次调用失败后按配置重试，重试耗尽返回 [`BackendError::RetriesExhausted`]。

use crate::config::Config;
use crate::error::BackendError;
use crate::models::ProviderModelPair;
use crate::utils::pause;
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const GEMINI_DEFAULT_URL: &str = "https://generativelanguage.googleapis.com";
const CLAUDE_DEFAULT_URL: &str = "https://api.anthropic.com";
const CLAUDE_API_VERSION: &str = "2023-06-01";
const CLAUDE_MAX_TOKENS: u32 = 4096;

/// 批量模式的说明文字
const BATCH_INSTRUCTIONS: &str = "You will analyze each review separately using the same exact \
output schema as in single-review mode. For each review, start your analysis with \
'Review {i} Analysis:' where {i} is the index.\n\n";

/// 分析后端种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// 本地 Ollama
    Ollama,
    OpenAi,
    Gemini,
    Claude,
}

impl ProviderKind {
    /// 配置中使用的名称
    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Claude => "claude",
        }
    }

    /// 从名称解析（忽略大小写），不在允许列表中返回 None
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ollama" => Some(ProviderKind::Ollama),
            "openai" => Some(ProviderKind::OpenAi),
            "gemini" => Some(ProviderKind::Gemini),
            "claude" => Some(ProviderKind::Claude),
            _ => None,
        }
    }

    /// 是否需要 API 密钥
    pub fn requires_api_key(self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }
}

/// 分析后端能力
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// 分析单条评论，返回模型原始输出
    async fn analyze(&self, text: &str, prompt: &str) -> Result<String, BackendError>;

    /// 一次调用分析多条评论，输出中每条以 `Review {i} Analysis:` 开头
    async fn analyze_batch(&self, _texts: &[String], _prompt: &str) -> Result<String, BackendError> {
        Err(BackendError::BatchUnsupported {
            provider: "unknown".to_string(),
        })
    }

    /// 是否支持批量分析
    fn supports_batch(&self) -> bool {
        false
    }
}

/// 后端创建能力
///
/// 编排层通过它为每个 (后端, 模型) 组合获取分析后端
pub trait BackendFactory: Send + Sync {
    /// `cancel` 为本次运行的停止信号，后端的重试等待应响应它
    fn create(
        &self,
        config: &Config,
        pair: &ProviderModelPair,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn AnalysisBackend>, BackendError>;
}

/// 单条评论的完整提示词
pub fn full_prompt(text: &str, prompt: &str) -> String {
    format!("Review Text:\n\"\"\"\n{}\n\"\"\"\n\n---\n\n{}", text, prompt)
}

/// 批量请求的正文
pub fn batch_payload(texts: &[String]) -> String {
    let mut payload = BATCH_INSTRUCTIONS.to_string();
    for (idx, text) in texts.iter().enumerate() {
        payload.push_str(&format!("Review {}:\n\"\"\"\n{}\n\"\"\"\n\n", idx + 1, text));
    }
    payload
}

/// 判断密钥是否为占位符
pub fn is_placeholder_key(key: &str) -> bool {
    let key = key.trim();
    key.is_empty() || key.contains("YOUR_") || key.contains("_KEY_HERE")
}

/// 重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 首次失败后的重试次数
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retries: config.analysis.api_retries,
            delay: Duration::from_secs(config.analysis.api_retry_delay),
        }
    }
}

/// 请求通道
enum Transport {
    OpenAi(Client<OpenAIConfig>),
    Http {
        http: reqwest::Client,
        base_url: String,
        api_key: Option<String>,
    },
}

/// LLM 客户端
pub struct LlmClient {
    kind: ProviderKind,
    model: String,
    transport: Transport,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl LlmClient {
    /// 创建新的 LLM 客户端
    ///
    /// # 参数
    /// - `kind`: 后端种类
    /// - `model`: API 模型名称
    /// - `api_key`: 密钥（Ollama 不需要）
    /// - `base_url`: 自定义服务地址
    pub fn new(
        kind: ProviderKind,
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: Option<String>,
        retry: RetryPolicy,
    ) -> Result<Self, BackendError> {
        if kind.requires_api_key() && api_key.as_deref().map_or(true, is_placeholder_key) {
            return Err(BackendError::Unavailable {
                provider: kind.name().to_string(),
                reason: "API 密钥缺失或为占位符".to_string(),
            });
        }

        let transport = match kind {
            ProviderKind::OpenAi => {
                let mut openai_config = OpenAIConfig::new().with_api_key(api_key.unwrap_or_default());
                if let Some(base) = base_url {
                    openai_config = openai_config.with_api_base(base);
                }
                Transport::OpenAi(Client::with_config(openai_config))
            }
            ProviderKind::Ollama | ProviderKind::Gemini | ProviderKind::Claude => {
                let default_url = match kind {
                    ProviderKind::Ollama => OLLAMA_DEFAULT_URL,
                    ProviderKind::Gemini => GEMINI_DEFAULT_URL,
                    _ => CLAUDE_DEFAULT_URL,
                };
                let http = reqwest::Client::builder()
                    .build()
                    .map_err(|e| BackendError::request_failed(kind.name(), e))?;
                Transport::Http {
                    http,
                    base_url: base_url
                        .unwrap_or_else(|| default_url.to_string())
                        .trim_end_matches('/')
                        .to_string(),
                    api_key,
                }
            }
        };

        Ok(Self {
            kind,
            model: model.into(),
            transport,
            retry,
            cancel: CancellationToken::new(),
        })
    }

    /// 停止信号触发后不再等待重试
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 带重试执行一次调用
    async fn with_retry<F, Fut>(&self, mut call: F) -> Result<String, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, BackendError>>,
    {
        let attempts = self.retry.retries + 1;
        let mut made = 0;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            made = attempt;
            match call().await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    warn!(
                        "⚠️ {} 调用失败 (第 {}/{} 次): {}",
                        self.kind.name(),
                        attempt,
                        attempts,
                        e
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        pause(self.retry.delay, &self.cancel).await;
                        if self.cancel.is_cancelled() {
                            info!("⏹️ 收到停止信号，放弃重试");
                            break;
                        }
                    }
                }
            }
        }

        error!("❌ {} 已达最大重试次数，放弃本次调用", self.kind.name());
        Err(BackendError::RetriesExhausted {
            provider: self.kind.name().to_string(),
            attempts: made,
            last_error,
        })
    }

    /// 发送一次对话请求
    async fn chat(&self, system: Option<&str>, user: &str) -> Result<String, BackendError> {
        debug!("正在调用 {}，模型: {}", self.kind.name(), self.model);

        let content = match &self.transport {
            Transport::OpenAi(client) => self.chat_openai(client, system, user).await?,
            Transport::Http {
                http,
                base_url,
                api_key,
            } => match self.kind {
                ProviderKind::Ollama => self.chat_ollama(http, base_url, system, user).await?,
                ProviderKind::Gemini => {
                    self.chat_gemini(http, base_url, api_key.as_deref().unwrap_or_default(), system, user)
                        .await?
                }
                _ => {
                    self.chat_claude(http, base_url, api_key.as_deref().unwrap_or_default(), system, user)
                        .await?
                }
            },
        };

        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(BackendError::EmptyResponse {
                provider: self.kind.name().to_string(),
            });
        }
        Ok(content)
    }

    async fn chat_openai(
        &self,
        client: &Client<OpenAIConfig>,
        system: Option<&str>,
        user: &str,
    ) -> Result<String, BackendError> {
        let provider = self.kind.name();
        let mut messages = Vec::new();

        if let Some(sys_msg) = system {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()
                .map_err(|e| BackendError::request_failed(provider, e))?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user)
            .build()
            .map_err(|e| BackendError::request_failed(provider, e))?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(|e| BackendError::request_failed(provider, e))?;

        let response = client
            .chat()
            .create(request)
            .await
            .map_err(|e| BackendError::request_failed(provider, e))?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| BackendError::EmptyResponse {
                provider: provider.to_string(),
            })
    }

    async fn chat_ollama(
        &self,
        http: &reqwest::Client,
        base_url: &str,
        system: Option<&str>,
        user: &str,
    ) -> Result<String, BackendError> {
        let mut messages = Vec::new();
        if let Some(sys_msg) = system {
            messages.push(json!({"role": "system", "content": sys_msg}));
        }
        messages.push(json!({"role": "user", "content": user}));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        let response = self
            .post_json(http.post(format!("{}/api/chat", base_url)), &body)
            .await?;

        Ok(response
            .pointer("/message/content")
            .or_else(|| response.pointer("/choices/0/message/content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn chat_gemini(
        &self,
        http: &reqwest::Client,
        base_url: &str,
        api_key: &str,
        system: Option<&str>,
        user: &str,
    ) -> Result<String, BackendError> {
        let mut body = json!({
            "contents": [{"role": "user", "parts": [{"text": user}]}],
        });
        if let Some(sys_msg) = system {
            body["systemInstruction"] = json!({"parts": [{"text": sys_msg}]});
        }

        let url = format!("{}/v1beta/models/{}:generateContent", base_url, self.model);
        let response = self
            .post_json(http.post(url).query(&[("key", api_key)]), &body)
            .await?;

        let text = response
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        Ok(text)
    }

    async fn chat_claude(
        &self,
        http: &reqwest::Client,
        base_url: &str,
        api_key: &str,
        system: Option<&str>,
        user: &str,
    ) -> Result<String, BackendError> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": CLAUDE_MAX_TOKENS,
            "messages": [{"role": "user", "content": user}],
        });
        if let Some(sys_msg) = system {
            body["system"] = json!(sys_msg);
        }

        let request = http
            .post(format!("{}/v1/messages", base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", CLAUDE_API_VERSION);
        let response = self.post_json(request, &body).await?;

        Ok(response
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn post_json(
        &self,
        request: reqwest::RequestBuilder,
        body: &Value,
    ) -> Result<Value, BackendError> {
        let provider = self.kind.name();
        let response = request
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::request_failed(provider, e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BackendError::request_failed(
                provider,
                format!("HTTP {}: {}", status.as_u16(), detail),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| BackendError::request_failed(provider, e))
    }
}

#[async_trait]
impl AnalysisBackend for LlmClient {
    async fn analyze(&self, text: &str, prompt: &str) -> Result<String, BackendError> {
        let user = full_prompt(text, prompt);
        self.with_retry(|| self.chat(None, &user)).await
    }

    async fn analyze_batch(&self, texts: &[String], prompt: &str) -> Result<String, BackendError> {
        match self.kind {
            // 本地模型没有批量接口，逐条调用后拼接
            ProviderKind::Ollama => {
                let mut outputs = Vec::with_capacity(texts.len());
                for (idx, text) in texts.iter().enumerate() {
                    let single = self.analyze(text, prompt).await.unwrap_or_else(|e| {
                        warn!("⚠️ 批量中第 {} 条分析失败: {}", idx + 1, e);
                        String::new()
                    });
                    outputs.push(format!("Review {} Analysis:\n{}", idx + 1, single));
                }
                Ok(outputs.join("\n\n"))
            }
            _ => {
                let payload = batch_payload(texts);
                self.with_retry(|| self.chat(Some(prompt), &payload)).await
            }
        }
    }

    fn supports_batch(&self) -> bool {
        true
    }
}

/// 按配置创建后端
#[derive(Debug, Clone, Copy, Default)]
pub struct LlmBackendFactory;

impl BackendFactory for LlmBackendFactory {
    fn create(
        &self,
        config: &Config,
        pair: &ProviderModelPair,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn AnalysisBackend>, BackendError> {
        let kind = ProviderKind::from_name(&pair.provider)
            .ok_or_else(|| BackendError::UnknownProvider(pair.provider.clone()))?;
        let provider_config = config.llm_providers.get(kind.name()).cloned().unwrap_or_default();

        let api_model = match kind {
            ProviderKind::Ollama => pair.model.clone(),
            _ => provider_config.resolve_api_model(&pair.model),
        };
        info!(
            "模型解析: '{}' -> '{}' (后端 '{}')",
            pair.model,
            api_model,
            kind.name()
        );

        let api_key = if kind.requires_api_key() {
            config.api_key(kind.name())
        } else {
            None
        };

        let client = LlmClient::new(
            kind,
            api_model,
            api_key,
            provider_config.base_url.clone(),
            RetryPolicy::from_config(config),
        )?
        .with_cancel(cancel.clone());
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_allow_list() {
        assert_eq!(ProviderKind::from_name("OpenAI"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::from_name(" claude "), Some(ProviderKind::Claude));
        assert_eq!(ProviderKind::from_name("mistral"), None);
        assert!(!ProviderKind::Ollama.requires_api_key());
    }

    #[test]
    fn test_full_prompt_layout() {
        assert_eq!(
            full_prompt("fun game", "Judge it."),
            "Review Text:\n\"\"\"\nfun game\n\"\"\"\n\n---\n\nJudge it."
        );
    }

    #[test]
    fn test_batch_payload_numbers_reviews() {
        let payload = batch_payload(&["first".to_string(), "second".to_string()]);
        assert!(payload.starts_with("You will analyze each review separately"));
        assert!(payload.contains("Review 1:\n\"\"\"\nfirst\n\"\"\"\n\n"));
        assert!(payload.ends_with("Review 2:\n\"\"\"\nsecond\n\"\"\"\n\n"));
    }

    #[test]
    fn test_placeholder_keys_rejected() {
        assert!(is_placeholder_key("YOUR_OPENAI_KEY"));
        assert!(is_placeholder_key("CLAUDE_KEY_HERE"));
        assert!(is_placeholder_key("  "));
        assert!(!is_placeholder_key("sk-live-123"));

        let retry = RetryPolicy {
            retries: 0,
            delay: Duration::ZERO,
        };
        let result = LlmClient::new(
            ProviderKind::Gemini,
            "gemini-pro",
            Some("YOUR_API_KEY".to_string()),
            None,
            retry,
        );
        assert!(matches!(result, Err(BackendError::Unavailable { .. })));
    }

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let config = Config::default();
        let pair = ProviderModelPair::new("mistral", "large");
        let result = LlmBackendFactory.create(&config, &pair, &CancellationToken::new());
        assert!(matches!(result, Err(BackendError::UnknownProvider(name)) if name == "mistral"));
    }

    #[test]
    fn test_factory_builds_local_model_without_key() {
        let config = Config::default();
        let pair = ProviderModelPair::new("ollama", "gemma3");
        let backend = LlmBackendFactory.create(&config, &pair, &CancellationToken::new()).unwrap();
        assert!(backend.supports_batch());
    }

    #[tokio::test]
    async fn test_stop_signal_cuts_retry_wait_short() {
        let cancel = CancellationToken::new();
        let client = LlmClient::new(
            ProviderKind::Ollama,
            "gemma3",
            None,
            None,
            RetryPolicy {
                retries: 3,
                delay: Duration::from_secs(3600),
            },
        )
        .unwrap()
        .with_cancel(cancel.clone());
        cancel.cancel();

        let calls = std::sync::atomic::AtomicUsize::new(0);
        let result = client
            .with_retry(|| {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async {
                    Err(BackendError::EmptyResponse {
                        provider: "Ollama".to_string(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(BackendError::RetriesExhausted { attempts: 1, .. })
        ));
    }
}
