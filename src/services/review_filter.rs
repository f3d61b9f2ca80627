//! 评论清洗与过滤服务 - 业务能力层

use crate::config::FilteringConfig;
use crate::models::RawReview;
use tracing::{debug, info};

/// 清洗已经解析好的评论
pub fn clean(reviews: Vec<RawReview>) -> Vec<RawReview> {
    reviews.into_iter().map(RawReview::cleaned).collect()
}

/// 按游玩时长和正文长度过滤
///
/// - `min_playtime_hours` 与 `author.playtime_forever`（分钟）比较
/// - `min_review_length` 按字符数比较
/// - 负数阈值视为 0
pub fn filter_reviews(reviews: Vec<RawReview>, settings: &FilteringConfig) -> Vec<RawReview> {
    let min_playtime_minutes = settings.min_playtime_hours.max(0).saturating_mul(60) as f64;
    let min_length = settings.min_review_length.max(0) as usize;
    info!(
        "过滤条件: 游玩时长 >= {} 小时，正文 >= {} 字符",
        settings.min_playtime_hours.max(0),
        min_length
    );

    let total = reviews.len();
    let filtered: Vec<RawReview> = reviews
        .into_iter()
        .enumerate()
        .filter(|(index, review)| {
            let playtime = review.playtime_forever().unwrap_or(0.0);
            let length = review.text().chars().count();
            let keep = playtime >= min_playtime_minutes && length >= min_length;
            if !keep {
                debug!(
                    "评论 {} 被过滤: 游玩 {} 分钟，正文 {} 字符",
                    index + 1,
                    playtime,
                    length
                );
            }
            keep
        })
        .map(|(_, review)| review)
        .collect();

    info!("过滤后剩余 {}/{} 条评论", filtered.len(), total);
    filtered
}
