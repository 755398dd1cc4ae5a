//! Content-addressed blob storage on the local filesystem.
//!
//! Each blob lives in one file named after its locator. Locators are
//! validated before touching the filesystem, so a request can never name a
//! path outside the base directory.

use std::path::PathBuf;

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use anchorline_shared::Cid;
use anchorline_store::{content_address, is_content_address};

use crate::error::ServerError;

#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
    max_size: usize,
}

impl BlobStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await?;

        info!(path = %base_path.display(), "Blob store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Store `data` and return its locator. Storing the same bytes twice is a
    /// no-op that returns the same locator.
    pub async fn store_blob(&self, data: &[u8]) -> Result<Cid, ServerError> {
        if data.is_empty() {
            return Err(ServerError::InvalidUpload("empty blob".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::TooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let cid = content_address(data);
        let path = self.base_path.join(cid.as_str());

        if fs::try_exists(&path).await.unwrap_or(false) {
            debug!(cid = %cid, "Blob already stored");
            return Ok(cid);
        }

        // Write then rename so readers never observe a partial blob. Each
        // writer gets its own temp file; concurrent identical uploads rename
        // identical bytes over one another.
        let tmp = self
            .base_path
            .join(format!("{}.{}.partial", cid.as_str(), Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp, data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        fs::rename(&tmp, &path).await?;

        debug!(cid = %cid, size = data.len(), "Stored blob");
        Ok(cid)
    }

    pub async fn get_blob(&self, cid: &str) -> Result<Vec<u8>, ServerError> {
        if !is_content_address(cid) {
            return Err(ServerError::MalformedLocator(cid.to_string()));
        }
        let path = self.base_path.join(cid);

        let data = fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ServerError::NotFound(cid.to_string()),
            _ => ServerError::Io(e),
        })?;

        debug!(cid = %cid, size = data.len(), "Retrieved blob");
        Ok(data)
    }
}
