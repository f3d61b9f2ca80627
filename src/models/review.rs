//! 评论数据模型

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Display;

/// 原始评论
///
/// 字段映射保持数据源返回的原样，只通过访问器读取关心的字段。
/// 从 CSV 读回时所有单元格都是字符串，访问器会做数值转换。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawReview {
    fields: Map<String, Value>,
}

impl RawReview {
    /// 从字段映射创建
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// 从任意 JSON 值创建，非对象返回 None
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// 全部字段
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// 读取顶层字段
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// 读取 `author` 下的字段
    pub fn author_field(&self, key: &str) -> Option<&Value> {
        self.fields.get("author")?.as_object()?.get(key)
    }

    /// 评论正文，非字符串值转为字符串
    pub fn text(&self) -> String {
        match self.fields.get("review") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// 评论 ID
    pub fn recommendation_id(&self) -> Option<String> {
        self.fields.get("recommendationid").and_then(value_as_key)
    }

    /// 作者账号 ID
    pub fn steamid(&self) -> Option<String> {
        self.author_field("steamid").and_then(value_as_key)
    }

    /// 累计游玩时长（分钟）
    pub fn playtime_forever(&self) -> Option<f64> {
        self.author_field("playtime_forever").and_then(value_as_f64)
    }

    /// 创建时间戳
    pub fn timestamp_created(&self) -> Option<i64> {
        self.fields.get("timestamp_created").and_then(value_as_i64)
    }

    /// 清洗评论字段
    ///
    /// - 正文统一为字符串，缺失或 null 为空串
    /// - 时间戳缺失或无法解析时置 0
    pub fn cleaned(mut self) -> Self {
        let text = self.text();
        self.fields.insert("review".to_string(), Value::String(text));

        for key in ["timestamp_created", "timestamp_updated"] {
            if !self.fields.contains_key(key) {
                continue;
            }
            let ts = self.fields.get(key).and_then(value_as_i64).unwrap_or(0);
            self.fields.insert(key.to_string(), Value::from(ts));
        }
        self
    }
}

impl From<Map<String, Value>> for RawReview {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

/// 数值或数值字符串转为 f64
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// 数值或数值字符串转为 i64，只接受整数值
pub fn value_as_i64(value: &Value) -> Option<i64> {
    if let Value::Number(n) = value {
        if let Some(i) = n.as_i64() {
            return Some(i);
        }
    }
    if let Value::String(s) = value {
        if let Ok(i) = s.trim().parse::<i64>() {
            return Some(i);
        }
    }
    let f = value_as_f64(value)?;
    (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
}

/// 标识类字段转为规范字符串
///
/// 数字与数字字符串得到相同结果，`76561198000000000` 与 `"76561198000000000"` 等价
pub fn value_as_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            // "123.0" 这类从表格读回的整数
            match s.parse::<f64>() {
                Ok(f) if f.is_finite() && f.fract() == 0.0 && !s.chars().all(|c| c.is_ascii_digit()) => {
                    Some(format!("{}", f as i64))
                }
                _ => Some(s.to_string()),
            }
        }
        Value::Number(n) => match (n.as_u64(), n.as_i64(), n.as_f64()) {
            (Some(u), _, _) => Some(u.to_string()),
            (_, Some(i), _) => Some(i.to_string()),
            (_, _, Some(f)) if f.fract() == 0.0 => Some(format!("{}", f as i64)),
            _ => Some(n.to_string()),
        },
        other => Some(other.to_string()),
    }
}

/// 工作项：一个待处理的应用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub app_id: u32,
    pub name: String,
}

impl WorkItem {
    pub fn new(app_id: u32, name: impl Into<String>) -> Self {
        Self {
            app_id,
            name: name.into(),
        }
    }
}

impl Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.app_id)
    }
}

/// (后端, 模型) 组合
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderModelPair {
    /// 后端名称（小写）
    pub provider: String,
    /// 模型显示名称
    pub model: String,
}

impl ProviderModelPair {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl Display for ProviderModelPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn review(value: Value) -> RawReview {
        RawReview::from_value(value).unwrap()
    }

    #[test]
    fn test_accessors_accept_numeric_strings() {
        let fetched = review(json!({
            "review": "great",
            "timestamp_created": 1700000000,
            "author": {"steamid": "76561198000000001", "playtime_forever": 120}
        }));
        let reloaded = review(json!({
            "review": "great",
            "timestamp_created": "1700000000",
            "author": {"steamid": "76561198000000001", "playtime_forever": "120"}
        }));

        assert_eq!(fetched.timestamp_created(), reloaded.timestamp_created());
        assert_eq!(fetched.steamid(), reloaded.steamid());
        assert_eq!(fetched.playtime_forever(), Some(120.0));
        assert_eq!(reloaded.playtime_forever(), Some(120.0));
    }

    #[test]
    fn test_cleaned_coerces_text_and_timestamps() {
        let cleaned = review(json!({
            "review": null,
            "timestamp_created": null,
            "timestamp_updated": "1700000001"
        }))
        .cleaned();

        assert_eq!(cleaned.get("review"), Some(&json!("")));
        assert_eq!(cleaned.get("timestamp_created"), Some(&json!(0)));
        assert_eq!(cleaned.get("timestamp_updated"), Some(&json!(1700000001)));

        let numeric_text = review(json!({"review": 42})).cleaned();
        assert_eq!(numeric_text.text(), "42");
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(RawReview::from_value(json!([1, 2])).is_none());
        assert!(RawReview::from_value(json!("text")).is_none());
    }

    #[test]
    fn test_value_as_key_normalises_numbers() {
        assert_eq!(value_as_key(&json!(123)), Some("123".to_string()));
        assert_eq!(value_as_key(&json!("123")), Some("123".to_string()));
        assert_eq!(value_as_key(&json!("123.0")), Some("123".to_string()));
        assert_eq!(value_as_key(&json!("")), None);
        assert_eq!(value_as_key(&json!("abc")), Some("abc".to_string()));
    }
}
