//! # anchorline-server
//!
//! Minimal content-addressed blob gateway speaking the two IPFS HTTP calls
//! the anchorline client uses:
//! - `POST /api/v0/add` stores a blob and replies with its locator
//! - `GET /ipfs/:cid` returns the stored bytes
//!
//! Blobs are addressed by their BLAKE3 digest, so identical uploads share a
//! locator and stored files are never rewritten.

mod api;
mod blob_store;
mod config;
mod error;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,anchorline_server=debug")),
        )
        .init();

    info!("Starting anchorline gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let blob_store = Arc::new(
        BlobStore::new(config.blob_storage_path.clone(), config.max_blob_size).await?,
    );

    let http_addr = config.http_addr;
    let app_state = AppState {
        blob_store,
        config: Arc::new(config),
    };

    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
