use actix_web::{web, HttpResponse};
use serde::Serialize;
use timeline_core::metrics;

use crate::state::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    database: &'static str,
    cache: &'static str,
    bus: &'static str,
    degraded: bool,
}

/// Never fails with a 5xx — an unhealthy dependency is reported in the
/// body, not surfaced as an HTTP error (spec.md §6).
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let database = if state.store.is_healthy().await {
        "healthy"
    } else {
        "unavailable"
    };
    let cache = if state.cache.available().await {
        "healthy"
    } else {
        "unavailable"
    };
    let bus = if state.bus.is_healthy().await {
        "healthy"
    } else {
        "unavailable"
    };

    let degraded = database != "healthy" || cache != "healthy" || bus != "healthy";

    HttpResponse::Ok().json(HealthResponse {
        database,
        cache,
        bus,
        degraded,
    })
}

#[derive(Debug, Serialize)]
struct SystemMetricsResponse {
    total_users: i64,
    total_posts: i64,
    celebrity_count: i64,
    cache_available: bool,
}

pub async fn system_metrics(state: web::Data<AppState>) -> actix_web::Result<HttpResponse> {
    let (total_users, total_posts, celebrity_count) = state
        .store
        .counts()
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    let cache_available = state.cache.available().await;

    Ok(HttpResponse::Ok().json(SystemMetricsResponse {
        total_users,
        total_posts,
        celebrity_count,
        cache_available,
    }))
}

/// Prometheus scrape endpoint, separate from the JSON summary above — the
/// teacher's services always expose both (SPEC_FULL.md §6).
pub async fn prometheus_metrics() -> HttpResponse {
    match metrics::render() {
        Ok(buffer) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer),
        Err(err) => {
            tracing::error!(error = %err, "failed to render metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}
