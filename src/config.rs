//! 程序配置
//!
//! 配置来自 TOML 文件，API 密钥优先读取 `<PROVIDER>_API_KEY` 环境变量。

use crate::error::ConfigError;
use crate::models::ProviderModelPair;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 程序配置文件
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 需要处理的应用 ID 列表
    pub app_ids: Vec<u32>,
    pub fetching: FetchingConfig,
    pub analysis: AnalysisConfig,
    pub filtering: FilteringConfig,
    pub file_paths: FilePathsConfig,
    /// 按后端名称分组的模型配置
    pub llm_providers: BTreeMap<String, ProviderConfig>,
    /// 配置文件中的 API 密钥（环境变量优先）
    pub api_keys: BTreeMap<String, String>,
    /// 配置来源文件，每次运行前会重新加载
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

/// 抓取配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FetchingConfig {
    /// 评论语言过滤
    pub language: String,
    /// 有限模式下每个应用抓取的评论数
    pub reviews_per_app: usize,
    /// 有限模式下每个应用的最大请求数
    pub max_requests_per_app: usize,
    /// 完整模式下每个应用的最大请求数
    pub complete_max_requests: usize,
    /// 是否默认启用完整抓取
    pub enable_complete_scraping: bool,
    /// 完整抓取时每累计多少条评论写一次进度
    pub checkpoint_interval: usize,
}

impl Default for FetchingConfig {
    fn default() -> Self {
        Self {
            language: "all".to_string(),
            reviews_per_app: 100,
            max_requests_per_app: 5,
            complete_max_requests: 2000,
            enable_complete_scraping: false,
            checkpoint_interval: 100,
        }
    }
}

/// 分析配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// 每个应用、每个模型分析的评论上限
    pub reviews_to_analyze: usize,
    /// 是否从已有结果继续
    pub enable_resume: bool,
    /// 每累计多少条结果写一次进度文件
    pub periodic_save_interval: usize,
    /// 单次 API 调用携带的评论数，大于 1 时启用批量模式
    pub api_batch_size: usize,
    /// 单次调用失败后的重试次数
    pub api_retries: u32,
    /// 重试间隔（秒）
    pub api_retry_delay: u64,
    /// 是否默认跳过抓取
    pub skip_scraping: bool,
    /// 提示词文件
    pub prompt_file: PathBuf,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            reviews_to_analyze: 100,
            enable_resume: true,
            periodic_save_interval: 10,
            api_batch_size: 1,
            api_retries: 2,
            api_retry_delay: 5,
            skip_scraping: false,
            prompt_file: PathBuf::from("prompts/prompt.txt"),
        }
    }
}

/// 评论过滤配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FilteringConfig {
    /// 最少游玩小时数
    pub min_playtime_hours: i64,
    /// 评论最少字符数
    pub min_review_length: i64,
}

impl Default for FilteringConfig {
    fn default() -> Self {
        Self {
            min_playtime_hours: 0,
            min_review_length: 50,
        }
    }
}

/// 输出目录配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FilePathsConfig {
    pub raw_output_folder: PathBuf,
    pub analysed_output_folder: PathBuf,
    pub summary_output_folder: PathBuf,
}

impl Default for FilePathsConfig {
    fn default() -> Self {
        Self {
            raw_output_folder: PathBuf::from("output/raw"),
            analysed_output_folder: PathBuf::from("output/analysed"),
            summary_output_folder: PathBuf::from("output/summary"),
        }
    }
}

/// 单个后端的配置
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub enabled: bool,
    /// 启用的模型（显示名称或 API 名称）
    pub enabled_models: Vec<String>,
    /// 可用模型列表，用于显示名称到 API 名称的映射
    pub available_models: Vec<ModelInfo>,
    /// 自定义服务地址（本地模型使用）
    pub base_url: Option<String>,
}

/// 模型信息
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ModelInfo {
    pub display_name: String,
    pub api_name: String,
    pub tags: Vec<String>,
}

impl ProviderConfig {
    /// 将显示名称解析为 API 模型名称
    ///
    /// 先按显示名称匹配，再按 API 名称匹配，都不匹配时原样返回
    pub fn resolve_api_model(&self, identifier: &str) -> String {
        if let Some(model) = self
            .available_models
            .iter()
            .find(|m| m.display_name == identifier)
            .or_else(|| self.available_models.iter().find(|m| m.api_name == identifier))
        {
            return model.api_name.clone();
        }
        if !self.available_models.is_empty() {
            warn!("未找到模型 '{}' 的映射信息，按原样使用", identifier);
        }
        identifier.to_string()
    }
}

impl Config {
    /// 从 TOML 文件加载配置
    ///
    /// 文件不存在时返回默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("⚠️ 配置文件不存在: {}，使用默认配置", path_str);
                return Ok(Self {
                    source_path: Some(path.to_path_buf()),
                    ..Self::default()
                });
            }
            Err(source) => {
                return Err(ConfigError::ReadFailed {
                    path: path_str,
                    source,
                })
            }
        };

        let mut config = Self::from_toml_str(&content).map_err(|source| {
            ConfigError::TomlParseFailed {
                path: path_str.clone(),
                source,
            }
        })?;
        config.source_path = Some(path.to_path_buf());

        info!("已加载配置: {}", path_str);
        Ok(config)
    }

    /// 从 TOML 字符串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 重新从来源文件加载（若有）
    pub fn reload(&self) -> Result<Self, ConfigError> {
        match &self.source_path {
            Some(path) => Self::load(path),
            None => Ok(self.clone()),
        }
    }

    /// 获取 API 密钥，环境变量 `<PROVIDER>_API_KEY` 优先
    pub fn api_key(&self, provider: &str) -> Option<String> {
        let env_var = format!("{}_API_KEY", provider.to_uppercase());
        std::env::var(env_var)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.api_keys.get(provider).cloned())
    }

    /// 列出所有已启用的 (后端, 模型) 组合
    pub fn selected_pairs(&self) -> Vec<ProviderModelPair> {
        self.llm_providers
            .iter()
            .filter(|(_, provider)| provider.enabled)
            .flat_map(|(name, provider)| {
                provider
                    .enabled_models
                    .iter()
                    .map(move |model| ProviderModelPair::new(name.clone(), model.clone()))
            })
            .collect()
    }

    /// 读取分析提示词，文件缺失时使用内置提示词
    pub fn load_prompt(&self) -> String {
        match std::fs::read_to_string(&self.analysis.prompt_file) {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::error!(
                    "提示词文件读取失败 ({}): {}，使用内置提示词",
                    self.analysis.prompt_file.display(),
                    e
                );
                DEFAULT_PROMPT.to_string()
            }
        }
    }
}

/// 内置分析提示词
pub const DEFAULT_PROMPT: &str = "\
Judge the review above against six constructs of self-determination theory.
For every construct answer on its own line using exactly this layout:

COMPETENCE SATISFACTION: TRUE or FALSE
COMPETENCE SATISFACTION QUOTE: the supporting sentence, or leave empty
COMPETENCE FRUSTRATION: TRUE or FALSE
COMPETENCE FRUSTRATION QUOTE: ...
AUTONOMY SATISFACTION: TRUE or FALSE
AUTONOMY SATISFACTION QUOTE: ...
AUTONOMY FRUSTRATION: TRUE or FALSE
AUTONOMY FRUSTRATION QUOTE: ...
RELATEDNESS SATISFACTION: TRUE or FALSE
RELATEDNESS SATISFACTION QUOTE: ...
RELATEDNESS FRUSTRATION: TRUE or FALSE
RELATEDNESS FRUSTRATION QUOTE: ...
";

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
app_ids = [570, 730]

[fetching]
reviews_per_app = 250
enable_complete_scraping = true

[analysis]
api_batch_size = 5

[llm_providers.openai]
enabled = true
enabled_models = ["GPT-4.1"]
available_models = [{ display_name = "GPT-4.1", api_name = "gpt-4.1" }]

[llm_providers.gemini]
enabled = false
enabled_models = ["gemini-pro"]

[llm_providers.ollama]
enabled = true
enabled_models = ["gemma3", "llama3"]
"#;

    #[test]
    fn test_parse_sections_and_defaults() {
        let config = Config::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.app_ids, vec![570, 730]);
        assert_eq!(config.fetching.reviews_per_app, 250);
        assert!(config.fetching.enable_complete_scraping);
        // 未配置的字段使用默认值
        assert_eq!(config.fetching.max_requests_per_app, 5);
        assert_eq!(config.analysis.api_batch_size, 5);
        assert_eq!(config.analysis.periodic_save_interval, 10);
        assert_eq!(config.filtering.min_review_length, 50);
    }

    #[test]
    fn test_selected_pairs_skip_disabled_providers() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        let pairs = config.selected_pairs();

        let names: Vec<String> = pairs.iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["ollama/gemma3", "ollama/llama3", "openai/GPT-4.1"]);
    }

    #[test]
    fn test_resolve_api_model() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        let openai = &config.llm_providers["openai"];

        assert_eq!(openai.resolve_api_model("GPT-4.1"), "gpt-4.1");
        assert_eq!(openai.resolve_api_model("gpt-4.1"), "gpt-4.1");
        assert_eq!(openai.resolve_api_model("o4-mini"), "o4-mini");
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();

        assert!(config.app_ids.is_empty());
        assert!(config.source_path.is_some());
    }

    #[test]
    fn test_load_from_file_records_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.app_ids, vec![570, 730]);
        assert_eq!(config.source_path.as_deref(), Some(path.as_path()));
    }
}
