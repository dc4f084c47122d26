mod config;
mod db;
mod domain;
mod error;
mod interview;
mod middleware;
mod scoring;
mod services;
mod state;
mod web;

use crate::config::AppConfig;
use crate::interview::{EngineConfig, InterviewEngine};
use crate::services::ai::OpenAiOracle;
use crate::state::{AppState, SharedState};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        tracing::error!("Failed to run database migrations: {}", e);
        e
    })?;

    let engine = Arc::new(InterviewEngine::new(
        Arc::new(db::PgStore::new(pool.clone())),
        Arc::new(OpenAiOracle::new(
            config.openai_api_key.clone(),
            config.openai_model.clone(),
        )),
        EngineConfig::default(),
    ));
    tracing::info!("Interview oracle model: {}", config.openai_model);

    let shared: SharedState = Arc::new(AppState::new(
        pool,
        engine,
        config.session_key.clone(),
        config.production,
    ));

    let scheduler = JobScheduler::new().await?;

    // Hourly: forget idle session locks and expired rate-limit windows.
    let shared_for_cleanup = shared.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let state = shared_for_cleanup.clone();
            Box::pin(async move {
                let pruned = state.engine.prune_idle_locks().await;
                let logins = state.login_limiter.cleanup().await;
                let answers = state.answer_limiter.cleanup().await;
                tracing::info!(
                    "Cleanup: {} idle session locks dropped, {} login and {} answer identifiers tracked",
                    pruned,
                    logins,
                    answers
                );
            })
        })?)
        .await?;
    scheduler.start().await?;

    let app = Router::new()
        .merge(web::routes(shared))
        .layer(middleware::build_cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
