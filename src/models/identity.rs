//! 评论身份与结果集合并
//!
//! 身份由 (创建时间戳, 作者账号, 正文前 50 个字符的摘要) 组成，
//! 用于断点续跑时判断哪些评论已经处理过。

use crate::models::review::RawReview;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt::Display;

/// 参与摘要计算的正文字符数
pub const IDENTITY_PREFIX_CHARS: usize = 50;

/// 评论身份
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReviewIdentity {
    pub timestamp: i64,
    pub account: String,
    pub text_digest: String,
}

impl Display for ReviewIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.timestamp, self.account, self.text_digest)
    }
}

/// 可计算身份的记录
pub trait Identified {
    fn identity(&self) -> ReviewIdentity;
}

impl Identified for RawReview {
    fn identity(&self) -> ReviewIdentity {
        identity(self)
    }
}

/// 计算评论身份
///
/// 缺失时间戳记为 0，缺失账号记为 `unknown`
pub fn identity(review: &RawReview) -> ReviewIdentity {
    let prefix: String = review.text().chars().take(IDENTITY_PREFIX_CHARS).collect();
    let digest = Sha256::digest(prefix.as_bytes());

    ReviewIdentity {
        timestamp: review.timestamp_created().unwrap_or(0),
        account: review.steamid().unwrap_or_else(|| "unknown".to_string()),
        text_digest: hex::encode(digest),
    }
}

/// 找出尚未处理的记录
///
/// 返回 `all` 中身份不在 `existing` 里的记录（保持原顺序），以及已处理的数量
pub fn diff<A, E>(all: &[A], existing: &[E]) -> (Vec<A>, usize)
where
    A: Identified + Clone,
    E: Identified,
{
    let done: HashSet<ReviewIdentity> = existing.iter().map(Identified::identity).collect();
    let pending: Vec<A> = all
        .iter()
        .filter(|item| !done.contains(&item.identity()))
        .cloned()
        .collect();
    let already_done = all.len() - pending.len();
    (pending, already_done)
}

/// 合并结果集
///
/// `existing` 原样保留；`incoming` 中身份未出现过的记录依次追加
pub fn merge<T>(existing: Vec<T>, incoming: impl IntoIterator<Item = T>) -> Vec<T>
where
    T: Identified,
{
    let mut seen: HashSet<ReviewIdentity> = existing.iter().map(Identified::identity).collect();
    let mut combined = existing;
    for item in incoming {
        if seen.insert(item.identity()) {
            combined.push(item);
        }
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn review(value: Value) -> RawReview {
        RawReview::from_value(value).unwrap()
    }

    fn sample(ts: i64, account: &str, text: &str) -> RawReview {
        review(json!({
            "review": text,
            "timestamp_created": ts,
            "author": {"steamid": account}
        }))
    }

    #[test]
    fn test_identity_is_stable_across_representations() {
        let fetched = sample(1700000000, "42", "same text");
        let reloaded = review(json!({
            "review": "same text",
            "timestamp_created": "1700000000",
            "author": {"steamid": 42}
        }));

        assert_eq!(identity(&fetched), identity(&reloaded));
        assert_eq!(identity(&fetched), identity(&fetched.clone()));
    }

    #[test]
    fn test_identity_defaults() {
        let id = identity(&review(json!({"review": "x"})));
        assert_eq!(id.timestamp, 0);
        assert_eq!(id.account, "unknown");
        assert_eq!(id.text_digest.len(), 64);
    }

    #[test]
    fn test_identity_only_uses_text_prefix() {
        let base = "a".repeat(IDENTITY_PREFIX_CHARS);
        let one = sample(1, "u", &format!("{}tail one", base));
        let two = sample(1, "u", &format!("{}tail two", base));
        assert_eq!(identity(&one), identity(&two));

        let other = sample(1, "u", &format!("b{}", base));
        assert_ne!(identity(&one), identity(&other));
    }

    #[test]
    fn test_diff_keeps_order_and_counts_done() {
        let all = vec![sample(1, "a", "r1"), sample(2, "b", "r2"), sample(3, "c", "r3")];
        let existing = vec![sample(2, "b", "r2")];

        let (pending, done) = diff(&all, &existing);
        assert_eq!(done, 1);
        assert_eq!(pending, vec![all[0].clone(), all[2].clone()]);
    }

    #[test]
    fn test_merge_is_idempotent_and_deduplicates() {
        let x = vec![sample(1, "a", "r1"), sample(2, "b", "r2")];
        let y = vec![sample(2, "b", "r2"), sample(3, "c", "r3"), sample(3, "c", "r3")];

        let xy = merge(x.clone(), y.clone());
        assert_eq!(xy.len(), 3);
        assert_eq!(&xy[..2], &x[..]);

        let again = merge(x.clone(), xy.clone());
        assert_eq!(again, xy);
    }
}
