use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use std::sync::Arc;
use timeline_cache::RedisCache;
use timeline_core::{logging, Config};
use timeline_store::PgStore;

use event_bus::PgEventBus;
use timeline_service::handlers;
use timeline_service::middleware::auth::AuthMiddleware;
use timeline_service::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("failed to load configuration")?;
    logging::init(&config.app.env);

    tracing::info!(env = %config.app.env, port = config.app.http_port, "starting timeline-service");

    let store = PgStore::connect(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
        config.database.connect_timeout_secs,
        config.database.acquire_timeout_secs,
        config.timeline.celebrity_threshold,
    )
    .await
    .context("failed to connect to database")?;
    store.migrate().await.context("failed to run store migrations")?;
    tracing::info!("database pool ready");

    let bus = PgEventBus::from_pool(
        store.pool().clone(),
        config.bus.visibility_timeout_secs,
        config.bus.max_receives,
        config.bus.publish_max_attempts,
    );
    bus.migrate().await.context("failed to run event bus migrations")?;
    tracing::info!("event bus ready");

    let cache = RedisCache::connect(&config.redis.url)
        .await
        .context("failed to connect to redis")?;
    tracing::info!("timeline cache ready");

    let app_state = AppState {
        store: Arc::new(store),
        cache: Arc::new(cache),
        bus: Arc::new(bus),
        config: Arc::new(config.clone()),
    };

    let http_addr = format!("{}:{}", config.app.host, config.app.http_port);
    tracing::info!(addr = %http_addr, "http server listening");

    let token_secret = config.auth.token_secret.clone();

    HttpServer::new(move || {
        let authenticated = web::scope("")
            .wrap(AuthMiddleware::new(token_secret.clone()))
            .route("/posts", web::post().to(handlers::posts::create_post))
            .route("/timeline", web::get().to(handlers::timeline::get_timeline))
            .route(
                "/users/follow/{user_id}",
                web::post().to(handlers::follow::follow),
            )
            .route(
                "/users/follow/{user_id}",
                web::delete().to(handlers::follow::unfollow),
            )
            .route(
                "/users/{user_id}/followers",
                web::get().to(handlers::follow::list_followers),
            );

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .route("/system/health", web::get().to(handlers::system::health))
            .route(
                "/system/metrics",
                web::get().to(handlers::system::system_metrics),
            )
            .route("/metrics", web::get().to(handlers::system::prometheus_metrics))
            .service(authenticated)
    })
    .shutdown_timeout(30)
    .bind(&http_addr)
    .with_context(|| format!("failed to bind {http_addr}"))?
    .run()
    .await
    .context("http server terminated unexpectedly")?;

    Ok(())
}
