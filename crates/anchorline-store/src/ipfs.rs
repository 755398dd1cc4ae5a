//! IPFS-compatible HTTP content store client.
//!
//! Uploads go to the node's HTTP API (`POST /api/v0/add`, multipart field
//! `file`), fetches go to a fixed gateway (`GET /ipfs/<cid>`). The gateway
//! served by `anchorline-server` speaks the same two endpoints.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use anchorline_shared::{AnchorError, Cid, Result};

use crate::content::ContentStore;

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Debug, Clone)]
pub struct HttpContentStore {
    client: reqwest::Client,
    api_url: String,
    gateway_url: String,
}

impl HttpContentStore {
    /// # Arguments
    ///
    /// * `api_url` - Base URL of the upload API (e.g. `http://127.0.0.1:5001`)
    /// * `gateway_url` - Base URL of the fetch gateway (e.g. `http://127.0.0.1:8080`)
    /// * `timeout` - Per-request timeout; expiry surfaces as `Unavailable`
    pub fn new(api_url: &str, gateway_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnchorError::Unavailable(format!("HTTP client setup failed: {e}")))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
        })
    }

    fn fetch_url(&self, cid: &Cid) -> Result<String> {
        // Locators come from the ledger; keep them from rewriting the URL.
        let s = cid.as_str();
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(AnchorError::NotFound(cid.clone()));
        }
        Ok(format!("{}/ipfs/{}", self.gateway_url, s))
    }
}

#[async_trait]
impl ContentStore for HttpContentStore {
    async fn upload(&self, bytes: Bytes) -> Result<Cid> {
        let size = bytes.len();
        let part = Part::bytes(bytes.to_vec())
            .file_name("batch.json")
            .mime_str("application/json")
            .map_err(|e| AnchorError::Unavailable(format!("Invalid upload part: {e}")))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/api/v0/add", self.api_url))
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnchorError::Unavailable(format!(
                "upload failed with HTTP {status}"
            )));
        }

        let added: AddResponse = response
            .json()
            .await
            .map_err(|e| AnchorError::Unavailable(format!("Malformed add response: {e}")))?;

        debug!(cid = %added.hash, size, "Uploaded blob");
        Ok(Cid(added.hash))
    }

    async fn fetch(&self, cid: &Cid) -> Result<Bytes> {
        let url = self.fetch_url(cid)?;
        debug!(url = %url, "Fetching blob");

        let response = self.client.get(&url).send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(cid, status));
        }

        response.bytes().await.map_err(transport_error)
    }
}

fn transport_error(e: reqwest::Error) -> AnchorError {
    if e.is_timeout() {
        AnchorError::Unavailable(format!("request timed out: {e}"))
    } else {
        AnchorError::Unavailable(e.to_string())
    }
}

fn status_error(cid: &Cid, status: StatusCode) -> AnchorError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => AnchorError::NotFound(cid.clone()),
        other => AnchorError::Unavailable(format!("gateway returned HTTP {other} for {cid}")),
    }
}
