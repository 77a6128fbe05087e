use actix_web::{web, HttpRequest, HttpResponse};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use timeline_core::domain::User;
use timeline_core::error::ServiceResult;

use crate::handlers::posts::current_user;
use crate::state::AppState;

pub async fn follow(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> ServiceResult<HttpResponse> {
    let actor = current_user(&req)?;
    let target = path.into_inner();

    state.store.add_follow(actor.0, target).await?;

    if let Err(err) = state.cache.invalidate(actor.0).await {
        tracing::warn!(error = %err, user_id = actor.0, "failed to invalidate timeline cache after follow");
    }

    Ok(HttpResponse::NoContent().finish())
}

pub async fn unfollow(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> ServiceResult<HttpResponse> {
    let actor = current_user(&req)?;
    let target = path.into_inner();

    state.store.remove_follow(actor.0, target).await?;

    if let Err(err) = state.cache.invalidate(actor.0).await {
        tracing::warn!(error = %err, user_id = actor.0, "failed to invalidate timeline cache after unfollow");
    }

    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize)]
pub struct FollowersQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct FollowersResponse {
    pub followers: Vec<User>,
    pub has_more: bool,
}

pub async fn list_followers(
    _req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<FollowersQuery>,
) -> ServiceResult<HttpResponse> {
    let user_id = path.into_inner();
    let limit = query.limit.clamp(1, 200);
    let offset = query.offset.max(0);

    let mut stream = state.store.followers_of(user_id);
    let mut ids = Vec::with_capacity(limit as usize + 1);
    let mut skipped = 0i64;
    while let Some(next) = stream.next().await {
        let follower_id = next?;
        if skipped < offset {
            skipped += 1;
            continue;
        }
        ids.push(follower_id);
        if ids.len() as i64 > limit {
            break;
        }
    }

    let has_more = ids.len() as i64 > limit;
    ids.truncate(limit as usize);

    let followers = state.store.get_users(&ids).await?;
    Ok(HttpResponse::Ok().json(FollowersResponse { followers, has_more }))
}
