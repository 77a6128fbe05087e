use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use timeline_core::auth::AuthenticatedUser;
use timeline_core::domain::{Post, TimelineEntry};
use timeline_core::error::ServiceResult;
use timeline_core::metrics;

use crate::handlers::posts::current_user;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct TimelineResponse {
    pub posts: Vec<Post>,
    pub source: &'static str,
    pub has_more: bool,
}

pub async fn get_timeline(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<TimelineQuery>,
) -> ServiceResult<HttpResponse> {
    let viewer = current_user(&req)?;
    let limit = query.limit.clamp(1, 100);
    let offset = query.offset.max(0);

    let (posts, source, has_more) = assemble_timeline(&state, viewer.0, limit, offset).await?;
    metrics::TIMELINE_READS_TOTAL.with_label_values(&[source]).inc();

    Ok(HttpResponse::Ok().json(TimelineResponse {
        posts,
        source,
        has_more,
    }))
}

/// Implements the timeline reader's merge algorithm (spec.md §4.G): read
/// the push-cached entries, pull fresh posts from followed celebrities,
/// merge and dedup by `post_id`, and fall back to a direct store scan when
/// the cache is unavailable or errors on read (§7: cache read errors are
/// swallowed, not surfaced).
pub async fn assemble_timeline(
    state: &AppState,
    viewer_id: i64,
    limit: i64,
    offset: i64,
) -> ServiceResult<(Vec<Post>, &'static str, bool)> {
    let window = offset + limit + 1;

    let push_entries = if state.cache.available().await {
        match state.cache.range(viewer_id, 0, window).await {
            Ok(entries) => Some(entries),
            Err(err) => {
                tracing::warn!(error = %err, viewer_id, "cache read failed, falling back to store");
                None
            }
        }
    } else {
        None
    };

    let (mut entries, source): (Vec<TimelineEntry>, &'static str) = match push_entries {
        Some(push) => {
            let celebrities = state.store.followed_celebrities_of(viewer_id).await?;
            if celebrities.is_empty() {
                (push, "cache")
            } else {
                let since = Utc::now()
                    - chrono::Duration::seconds(state.config.timeline.celebrity_pull_lookback_secs);
                let pulled = state
                    .store
                    .recent_posts_by_authors(&celebrities, since, 20)
                    .await?;
                let mut merged = push;
                merged.extend(pulled.into_iter().map(|p| TimelineEntry {
                    post_id: p.post_id,
                    score: p.created_at_ms,
                }));
                (merged, "cache+pull")
            }
        }
        None => {
            let followed = state.store.followed_user_ids(viewer_id).await?;
            let since =
                Utc::now() - chrono::Duration::seconds(state.config.timeline.fallback_lookback_secs);
            let posts = state
                .store
                .recent_posts_by_authors(&followed, since, window)
                .await?;
            let entries = posts
                .into_iter()
                .map(|p| TimelineEntry {
                    post_id: p.post_id,
                    score: p.created_at_ms,
                })
                .collect();
            (entries, "database")
        }
    };

    entries.sort_by(TimelineEntry::cmp_for_read);
    let mut seen = HashSet::new();
    entries.retain(|e| seen.insert(e.post_id));

    let has_more = entries.len() as i64 > offset + limit;
    let page: Vec<TimelineEntry> = entries
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect();

    let post_ids: Vec<i64> = page.iter().map(|e| e.post_id).collect();
    let fetched = state.store.get_posts(&post_ids).await?;
    let mut by_id: HashMap<i64, Post> = fetched.into_iter().map(|p| (p.post_id, p)).collect();
    let ordered_posts: Vec<Post> = page
        .iter()
        .filter_map(|e| by_id.remove(&e.post_id))
        .collect();

    Ok((ordered_posts, source, has_more))
}
