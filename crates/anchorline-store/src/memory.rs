//! In-process content store.
//!
//! Used for offline runs and tests. Besides the [`ContentStore`] contract it
//! lets the owner remove or overwrite blobs and take the store offline, which
//! is how unreachable and tampered content gets modeled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use anchorline_shared::{AnchorError, Cid, Result};

use crate::content::{content_address, ContentStore};

#[derive(Debug, Default)]
struct MemoryState {
    blobs: HashMap<Cid, Bytes>,
    offline: bool,
    fetches: usize,
}

/// Cloning shares the underlying blobs.
#[derive(Debug, Clone, Default)]
pub struct MemoryContentStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| AnchorError::Unavailable("memory store lock poisoned".into()))
    }

    /// Drop a blob, as if it had been garbage collected upstream.
    pub fn remove(&self, cid: &Cid) -> bool {
        self.state().is_ok_and(|mut s| s.blobs.remove(cid).is_some())
    }

    /// Overwrite the bytes behind an existing locator.
    pub fn replace(&self, cid: &Cid, bytes: impl Into<Bytes>) -> bool {
        self.state().is_ok_and(|mut s| match s.blobs.get_mut(cid) {
            Some(slot) => {
                *slot = bytes.into();
                true
            }
            None => false,
        })
    }

    /// While offline every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut s) = self.state() {
            s.offline = offline;
        }
    }

    /// Number of fetch calls served so far, successful or not.
    pub fn fetch_count(&self) -> usize {
        self.state().map(|s| s.fetches).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state().map(|s| s.blobs.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn upload(&self, bytes: Bytes) -> Result<Cid> {
        let mut state = self.state()?;
        if state.offline {
            return Err(AnchorError::Unavailable("memory store is offline".into()));
        }
        let cid = content_address(&bytes);
        debug!(cid = %cid, size = bytes.len(), "Stored blob in memory");
        state.blobs.entry(cid.clone()).or_insert(bytes);
        Ok(cid)
    }

    async fn fetch(&self, cid: &Cid) -> Result<Bytes> {
        let mut state = self.state()?;
        state.fetches += 1;
        if state.offline {
            return Err(AnchorError::Unavailable("memory store is offline".into()));
        }
        state
            .blobs
            .get(cid)
            .cloned()
            .ok_or_else(|| AnchorError::NotFound(cid.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_and_fetch() {
        let store = MemoryContentStore::new();
        let cid = store.upload(Bytes::from_static(b"[]")).await.unwrap();
        assert_eq!(store.fetch(&cid).await.unwrap(), Bytes::from_static(b"[]"));
        assert_eq!(store.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_upload_is_content_addressed() {
        let store = MemoryContentStore::new();
        let a = store.upload(Bytes::from_static(b"same")).await.unwrap();
        let b = store.upload(Bytes::from_static(b"same")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_removed_blob_not_found() {
        let store = MemoryContentStore::new();
        let cid = store.upload(Bytes::from_static(b"gone")).await.unwrap();
        assert!(store.remove(&cid));
        assert_eq!(store.fetch(&cid).await, Err(AnchorError::NotFound(cid)));
    }

    #[tokio::test]
    async fn test_offline_is_unavailable() {
        let store = MemoryContentStore::new();
        let cid = store.upload(Bytes::from_static(b"x")).await.unwrap();
        store.set_offline(true);
        assert!(matches!(
            store.fetch(&cid).await,
            Err(AnchorError::Unavailable(_))
        ));
        assert!(store.upload(Bytes::from_static(b"y")).await.is_err());
        store.set_offline(false);
        assert!(store.fetch(&cid).await.is_ok());
    }

    #[tokio::test]
    async fn test_replace_keeps_locator() {
        let store = MemoryContentStore::new();
        let cid = store.upload(Bytes::from_static(b"original")).await.unwrap();
        assert!(store.replace(&cid, Bytes::from_static(b"tampered")));
        assert_eq!(store.fetch(&cid).await.unwrap(), Bytes::from_static(b"tampered"));
        assert!(!store.replace(&Cid::new("b3missing"), Bytes::new()));
    }
}
