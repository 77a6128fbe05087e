//! Domain types shared by the store, cache, bus, and HTTP layers.

use crate::error::{ServiceError, ServiceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_CONTENT_CODEPOINTS: usize = 5000;
pub const MIN_CONTENT_CODEPOINTS: usize = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub user_id: i64,
    pub username: String,
    pub follower_count: i64,
    pub following_count: i64,
    pub is_celebrity: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub post_id: i64,
    pub author_id: i64,
    pub content: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowEdge {
    pub follower_id: i64,
    pub following_id: i64,
    pub created_at_ms: i64,
}

/// A single entry in a cached timeline: a post id ordered by score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineEntry {
    pub post_id: i64,
    pub score: i64,
}

impl TimelineEntry {
    /// Ordering used everywhere a timeline is read: score descending,
    /// ties broken by the *lower* post_id sorting last (spec.md §4.G).
    pub fn cmp_for_read(a: &TimelineEntry, b: &TimelineEntry) -> std::cmp::Ordering {
        b.score.cmp(&a.score).then(b.post_id.cmp(&a.post_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCreatedEvent {
    pub post_id: i64,
    pub author_id: i64,
    pub is_celebrity_at_emit: bool,
    pub created_at_ms: i64,
}

/// `is_celebrity == (follower_count >= threshold)`, re-evaluated
/// synchronously inside the transaction that changes `follower_count`
/// (spec.md §3, §4.D, §9).
pub fn is_celebrity(follower_count: i64, threshold: i64) -> bool {
    follower_count >= threshold
}

/// Trim + codepoint-count validation for post content (spec.md §4.E).
pub fn validate_content(raw: &str) -> ServiceResult<String> {
    let trimmed = raw.trim().to_string();
    let len = trimmed.chars().count();
    if len < MIN_CONTENT_CODEPOINTS {
        return Err(ServiceError::InvalidArgument(
            "content must not be empty".to_string(),
        ));
    }
    if len > MAX_CONTENT_CODEPOINTS {
        return Err(ServiceError::InvalidArgument(format!(
            "content must be at most {MAX_CONTENT_CODEPOINTS} codepoints, got {len}"
        )));
    }
    Ok(trimmed)
}

pub fn to_score_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}
