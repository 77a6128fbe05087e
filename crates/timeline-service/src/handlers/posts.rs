use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use timeline_core::auth::AuthenticatedUser;
use timeline_core::domain::{validate_content, Post, PostCreatedEvent};
use timeline_core::error::{ServiceError, ServiceResult};
use timeline_core::metrics;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct CreatePostResponse {
    #[serde(flatten)]
    pub post: Post,
    /// Non-fatal problems encountered while handling the request — the
    /// post itself has already committed (spec.md §4.E, §7).
    pub warnings: Vec<String>,
}

pub async fn create_post(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreatePostRequest>,
) -> ServiceResult<HttpResponse> {
    let author = current_user(&req)?;
    let content = validate_content(&body.content)?;

    let post = state.store.create_post(author.0, &content).await?;
    metrics::POSTS_CREATED_TOTAL.inc();

    let mut warnings = Vec::new();

    let author_record = state.store.get_user_by_id(author.0).await?;
    if !author_record.is_celebrity {
        let event = PostCreatedEvent {
            post_id: post.post_id,
            author_id: post.author_id,
            is_celebrity_at_emit: author_record.is_celebrity,
            created_at_ms: post.created_at_ms,
        };
        match serde_json::to_value(&event) {
            Ok(payload) => {
                if let Err(err) = state.bus.publish(payload).await {
                    tracing::error!(error = %err, post_id = post.post_id, "failed to publish post_created event");
                    warnings.push("fan-out delayed: event publish failed, post will still reach followers via fallback scan".to_string());
                } else {
                    metrics::FANOUT_EVENTS_PUBLISHED_TOTAL.inc();
                }
            }
            Err(err) => {
                tracing::error!(error = %err, post_id = post.post_id, "failed to serialize post_created event");
                warnings.push("fan-out delayed: event publish failed, post will still reach followers via fallback scan".to_string());
            }
        }
    }

    Ok(HttpResponse::Created().json(CreatePostResponse { post, warnings }))
}

pub fn current_user(req: &HttpRequest) -> ServiceResult<AuthenticatedUser> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .copied()
        .ok_or_else(|| ServiceError::Unauthorized("missing authenticated user".to_string()))
}
