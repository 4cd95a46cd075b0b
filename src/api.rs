use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

use crate::sentinel::{GuildStatus, Sentinel};

/// `/health` + podgląd stanu zagrożenia gildii (tylko odczyt).
pub fn router(sentinel: Arc<Sentinel>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/guilds/{guild_id}/status", get(status))
        .with_state(sentinel)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(State(sentinel): State<Arc<Sentinel>>, Path(guild_id): Path<u64>) -> Json<GuildStatus> {
    Json(sentinel.status(guild_id).await)
}

/// Start simple HTTP server exposing healthcheck and status probe.
pub async fn serve(addr: SocketAddr, sentinel: Arc<Sentinel>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "ops API listening");
    axum::serve(listener, router(sentinel)).await?;
    Ok(())
}
