//! Axum HTTP server setup and routing

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::*;
use crate::state::SharedState;

pub fn create_router(state: SharedState) -> Router {
    // Configure CORS to allow requests from wallet frontend/tests
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health_check))

        // Output endpoints
        .route("/api/txos/address/:address/unspent", get(get_unspent))
        .route("/api/txos/:outpoint", get(get_output))
        .route("/api/locks/address/:address/unspent", get(get_locked))
        .route("/api/bsv20/:address/id/:id", get(get_token_outputs))
        .route("/api/spends", post(post_spends))
        .route("/content/:origin", get(get_content))

        // Transaction endpoints
        .route("/api/tx", post(broadcast_transaction))

        // Mock helper endpoints
        .route("/mock/fund", post(fund))
        .route("/mock/inscribe", post(inscribe))
        .route("/mock/lock", post(lock_coins))
        .route("/mock/broadcast-mode", post(set_broadcast_mode))
        .route("/mock/tx/:txid", get(get_transaction_hex))

        // Shared state
        .with_state(state)

        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_server(state: SharedState, host: String, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("Indexer mock server listening on http://{}", addr);
    log::info!("Funding endpoints: POST /mock/fund, POST /mock/inscribe");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Serve on an ephemeral local port in the background
pub async fn spawn_server(state: SharedState) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = create_router(state);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            log::error!("Indexer mock server stopped: {}", e);
        }
    });

    log::debug!("Indexer mock server listening on http://{}", addr);
    Ok(addr)
}
