//! HTTP surface: a thin router over the typed service. Behavior lives
//! with the service methods; this module only wires paths, verbs and the
//! error mapping.

pub mod error;
pub mod handlers;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post, put};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::service::Service;
use crate::store::SqliteStore;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Service>,
}

pub fn router(service: Arc<Service>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health (public)
        .route("/health", get(handlers::health))
        // Upstream-backed reads, plus the local agent override write
        .route(
            "/api/agents/{agent_id}",
            get(handlers::agents).put(handlers::agent_update),
        )
        .route("/api/agents/{agent_id}/customers", get(handlers::customers))
        .route(
            "/api/agents/{agent_id}/customers/{customer_id}",
            get(handlers::customer_details),
        )
        .route("/api/agents/{agent_id}/pending", get(handlers::pending_wagers))
        .route("/api/agents/{agent_id}/weekly", get(handlers::weekly_figures))
        .route(
            "/api/agents/{agent_id}/performance",
            get(handlers::agent_performance),
        )
        .route("/api/agents/{agent_id}/activity", get(handlers::live_activity))
        .route(
            "/api/agents/{agent_id}/transactions",
            get(handlers::transactions),
        )
        // Local overrides
        .route("/api/customers/{customer_id}", put(handlers::customer_update))
        // Settlement
        .route("/api/settle", post(handlers::settle))
        .route("/api/settle/bulk", post(handlers::bulk_settle))
        // Payment queues & matching
        .route("/api/queue", get(handlers::queue_items))
        .route("/api/queue/withdrawals", post(handlers::enqueue_withdrawal))
        .route("/api/queue/deposits", post(handlers::enqueue_deposit))
        .route("/api/matcher/run", post(handlers::run_matcher))
        .route("/api/matches/{match_id}/start", post(handlers::start_match))
        .route(
            "/api/matches/{match_id}/complete",
            post(handlers::complete_match),
        )
        .route("/api/matches/{match_id}/fail", post(handlers::fail_match))
        // Stats & live push
        .route("/api/stats", get(handlers::stats))
        .route("/api/live", get(handlers::live_stream))
        .layer(cors)
        .with_state(AppState { service })
}

pub async fn serve(config: Config, host: &str, port: u16, data_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db_path = data_dir.join("wagerdesk.db");
    let store = Arc::new(SqliteStore::open(&db_path)?);

    let service = Arc::new(Service::new(config, store));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let tasks = service.spawn_background(&shutdown_tx);

    let app = router(service);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(%addr, db = %db_path.display(), "wagerdesk api listening");

    let shutdown_for_server = shutdown_tx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            let _ = shutdown_for_server.send(());
        })
        .await
        .context("running server")?;

    let _ = shutdown_tx.send(());
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}
