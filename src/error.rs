use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置或前置条件错误（不可重试）
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 评论数据源错误
    #[error("数据源错误: {0}")]
    Feed(#[from] FeedError),
    /// 分析后端错误
    #[error("分析后端错误: {0}")]
    Backend(#[from] BackendError),
    /// 检查点读写错误
    #[error("检查点错误: {0}")]
    Checkpoint(#[from] CheckpointError),
    /// 输出解析规则编译失败
    #[error("正则表达式编译失败: {0}")]
    Pattern(#[from] regex::Error),
    /// 已有任务正在运行，新任务被拒绝
    #[error("已有任务正在运行")]
    AlreadyRunning,
}

/// 配置与前置条件错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// 没有配置任何 App ID
    #[error("没有配置任何 App ID")]
    NoWorkItems,
    /// 没有选择任何模型
    #[error("没有选择任何 LLM 模型")]
    NoModelsSelected,
    /// 跳过抓取时缺少原始评论
    #[error("无法跳过抓取，以下应用缺少原始评论: {apps}")]
    MissingRawReviews { apps: String },
}

/// 评论数据源错误
///
/// 每个变体对应爬虫的一种退避策略，见 [`FeedError::backoff`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// 服务过载（HTTP 502 / 503）
    #[error("服务暂时不可用 (HTTP {status})")]
    Overloaded { status: u16 },
    /// 请求频率限制（HTTP 429）
    #[error("请求频率限制 (HTTP 429)")]
    RateLimited,
    /// 其他 HTTP 错误状态
    #[error("HTTP 错误 (HTTP {status})")]
    Http { status: u16 },
    /// 网络传输失败
    #[error("网络请求失败: {0}")]
    Transport(String),
    /// 响应体无法解析
    #[error("响应解析失败: {0}")]
    Decode(String),
    /// 服务返回 success != 1
    #[error("接口返回失败标记 success={code}")]
    Unsuccessful { code: i64 },
}

/// 分析后端错误
#[derive(Debug, Error)]
pub enum BackendError {
    /// 能力不可用（缺少凭据等），该模型组合会被跳过
    #[error("后端 '{provider}' 不可用: {reason}")]
    Unavailable { provider: String, reason: String },
    /// 不在允许列表中的后端名称
    #[error("未知的后端 '{0}'")]
    UnknownProvider(String),
    /// 后端不支持批量分析
    #[error("后端 '{provider}' 不支持批量分析")]
    BatchUnsupported { provider: String },
    /// 单次调用失败
    #[error("后端 '{provider}' 调用失败: {message}")]
    RequestFailed { provider: String, message: String },
    /// 返回内容为空
    #[error("后端 '{provider}' 返回内容为空")]
    EmptyResponse { provider: String },
    /// 重试次数耗尽
    #[error("后端 '{provider}' 已重试 {attempts} 次仍失败: {last_error}")]
    RetriesExhausted {
        provider: String,
        attempts: u32,
        last_error: String,
    },
}

/// 检查点读写错误
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// 文件读写失败
    #[error("文件操作失败 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// CSV 编解码失败
    #[error("CSV 处理失败 ({path}): {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    /// JSON 序列化失败
    #[error("JSON 序列化失败: {0}")]
    Json(#[from] serde_json::Error),
}

impl FeedError {
    /// 失败后的等待时间
    ///
    /// - 502 / 503：`min(30s, 5s × 连续失败次数)`
    /// - 429：`min(60s, 10s × 连续失败次数)`
    /// - 其他：固定 `unit`
    ///
    /// `unit` 为基础单位（默认 5 秒，测试中为 0）
    pub fn backoff(&self, consecutive: u32, unit: std::time::Duration) -> std::time::Duration {
        match self {
            FeedError::Overloaded { .. } => (unit * consecutive).min(unit * 6),
            FeedError::RateLimited => (unit * 2 * consecutive).min(unit * 12),
            _ => unit,
        }
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建前置条件错误：缺少原始评论
    pub fn missing_raw_reviews(apps: impl Into<String>) -> Self {
        AppError::Config(ConfigError::MissingRawReviews { apps: apps.into() })
    }

    /// 是否属于配置/前置条件类错误
    pub fn is_precondition(&self) -> bool {
        matches!(self, AppError::Config(_))
    }
}

impl CheckpointError {
    /// 创建文件操作错误
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        CheckpointError::Io {
            path: path.into(),
            source,
        }
    }

    /// 创建 CSV 错误
    pub fn csv(path: impl Into<String>, source: csv::Error) -> Self {
        CheckpointError::Csv {
            path: path.into(),
            source,
        }
    }
}

impl BackendError {
    /// 创建单次调用失败错误
    pub fn request_failed(provider: impl Into<String>, message: impl std::fmt::Display) -> Self {
        BackendError::RequestFailed {
            provider: provider.into(),
            message: message.to_string(),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_backoff_by_error_class() {
        let unit = Duration::from_secs(5);
        let overloaded = FeedError::Overloaded { status: 503 };
        assert_eq!(overloaded.backoff(1, unit), Duration::from_secs(5));
        assert_eq!(overloaded.backoff(4, unit), Duration::from_secs(20));
        assert_eq!(overloaded.backoff(9, unit), Duration::from_secs(30));

        assert_eq!(FeedError::RateLimited.backoff(1, unit), Duration::from_secs(10));
        assert_eq!(FeedError::RateLimited.backoff(8, unit), Duration::from_secs(60));

        let other = FeedError::Transport("timeout".to_string());
        assert_eq!(other.backoff(7, unit), unit);
    }

    #[test]
    fn test_precondition_errors() {
        assert!(AppError::missing_raw_reviews("Game (ID: 1)").is_precondition());
        assert!(AppError::from(ConfigError::NoWorkItems).is_precondition());
        assert!(!AppError::AlreadyRunning.is_precondition());
    }
}
