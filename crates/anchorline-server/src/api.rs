use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::error::ServerError;

/// Room for multipart framing around a maximum-size blob.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub blob_store: Arc<BlobStore>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.blob_store.max_size() + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v0/add", post(add))
        .route("/ipfs/:cid", get(cat))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    max_blob_size: usize,
}

/// Same field names as an IPFS node's `add` reply.
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AddResponse {
    name: String,
    hash: String,
    size: String,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        max_blob_size: state.config.max_blob_size,
    })
}

/// Store the first part of a multipart upload.
async fn add(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AddResponse>, ServerError> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::InvalidUpload(e.to_string()))?
        .ok_or_else(|| ServerError::InvalidUpload("multipart form has no parts".to_string()))?;

    let data = field
        .bytes()
        .await
        .map_err(|e| ServerError::InvalidUpload(e.to_string()))?;

    let cid = state.blob_store.store_blob(&data).await?;

    info!(cid = %cid, size = data.len(), "Blob added");

    Ok(Json(AddResponse {
        name: cid.to_string(),
        hash: cid.to_string(),
        size: data.len().to_string(),
    }))
}

async fn cat(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let data = state.blob_store.get_blob(&cid).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable"),
        ],
        data,
    ))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
