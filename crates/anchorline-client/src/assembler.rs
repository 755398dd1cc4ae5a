//! Rebuild a conversation from its anchors.
//!
//! Assembly lists every anchor of a key, fetches the referenced blobs with
//! bounded concurrency, verifies each against its commit hash and merges the
//! decoded messages into one timestamp-ordered view. A blob that cannot be
//! fetched, verified or decoded costs exactly its own messages: it becomes an
//! [`AssemblyWarning::AnchorFailed`] and every other anchor still contributes.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use anchorline_shared::constants::{DEFAULT_BATCH_CACHE_CAPACITY, DEFAULT_FETCH_CONCURRENCY};
use anchorline_shared::{
    decode_batch, hash, AnchorError, AnchorRecord, Cid, CommitHash, ConversationKey, DecodedBatch,
    Message, Result,
};
use anchorline_store::ContentStore;

use crate::anchor::LedgerAnchor;

/// Something that went wrong with a single anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyWarning {
    /// The blob contributed nothing.
    AnchorFailed {
        position: u64,
        cid: Cid,
        error: AnchorError,
    },
    /// The blob was usable but some of its entries were not.
    SkippedEntries { position: u64, cid: Cid, count: usize },
    /// `previous_cid` does not name the locator of the preceding anchor.
    ChainMismatch {
        position: u64,
        expected: Option<Cid>,
        found: Cid,
    },
}

impl fmt::Display for AssemblyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyWarning::AnchorFailed {
                position,
                cid,
                error,
            } => write!(f, "anchor #{position} ({cid}) could not be loaded: {error}"),
            AssemblyWarning::SkippedEntries {
                position,
                cid,
                count,
            } => write!(f, "anchor #{position} ({cid}): {count} malformed entries skipped"),
            AssemblyWarning::ChainMismatch {
                position,
                expected: Some(expected),
                found,
            } => write!(f, "anchor #{position} links to {found}, expected {expected}"),
            AssemblyWarning::ChainMismatch {
                position,
                expected: None,
                found,
            } => write!(f, "anchor #{position} links to {found} but has no predecessor"),
        }
    }
}

/// The merged view of one conversation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub key: ConversationKey,
    /// Ascending by timestamp; ties keep ledger order, then in-blob order.
    pub messages: Vec<Message>,
    pub warnings: Vec<AssemblyWarning>,
    pub anchor_count: usize,
}

impl Conversation {
    /// Anchors whose blob contributed nothing.
    pub fn failed_anchor_count(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, AssemblyWarning::AnchorFailed { .. }))
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_anchor_count() == 0
    }
}

pub struct ConversationAssembler {
    store: Arc<dyn ContentStore>,
    anchors: Arc<LedgerAnchor>,
    fetch_concurrency: usize,
    cache: BatchCache,
}

impl ConversationAssembler {
    pub fn new(store: Arc<dyn ContentStore>, anchors: Arc<LedgerAnchor>) -> Self {
        Self {
            store,
            anchors,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            cache: BatchCache::new(DEFAULT_BATCH_CACHE_CAPACITY),
        }
    }

    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency.max(1);
        self
    }

    /// Zero disables caching of verified batches.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = BatchCache::new(capacity);
        self
    }

    pub fn anchors(&self) -> &Arc<LedgerAnchor> {
        &self.anchors
    }

    /// Assemble the current state of `key`.
    ///
    /// Fails only if the anchor list itself cannot be obtained. Per-anchor
    /// problems are reported in [`Conversation::warnings`].
    pub async fn assemble(&self, key: &ConversationKey) -> Result<Conversation> {
        let records = self.anchors.list(key).await?;

        let loads: Vec<Result<Arc<DecodedBatch>>> = stream::iter(records.iter().cloned())
            .map(|record| async move { self.load(key, &record).await })
            .buffered(self.fetch_concurrency)
            .collect()
            .await;

        let mut messages = Vec::new();
        let mut warnings = Vec::new();

        for (index, (record, load)) in records.iter().zip(loads).enumerate() {
            if let Some(found) = &record.previous_cid {
                let expected = index.checked_sub(1).map(|prev| records[prev].cid.clone());
                if expected.as_ref() != Some(found) {
                    warn!(key = %key, position = record.position, "Broken previous_cid link");
                    warnings.push(AssemblyWarning::ChainMismatch {
                        position: record.position,
                        expected,
                        found: found.clone(),
                    });
                }
            }

            match load {
                Ok(batch) => {
                    if batch.skipped > 0 {
                        warnings.push(AssemblyWarning::SkippedEntries {
                            position: record.position,
                            cid: record.cid.clone(),
                            count: batch.skipped,
                        });
                    }
                    messages.extend(batch.messages.iter().cloned());
                }
                Err(error) if error.is_isolated() => {
                    warn!(
                        key = %key,
                        position = record.position,
                        cid = %record.cid,
                        error = %error,
                        "Anchor excluded from conversation"
                    );
                    warnings.push(AssemblyWarning::AnchorFailed {
                        position: record.position,
                        cid: record.cid.clone(),
                        error,
                    });
                }
                Err(error) => return Err(error),
            }
        }

        // Stable: equal timestamps keep ledger order, then in-blob order.
        messages.sort_by_key(|m| m.timestamp_ms);

        debug!(
            key = %key,
            anchors = records.len(),
            messages = messages.len(),
            warnings = warnings.len(),
            "Conversation assembled"
        );

        Ok(Conversation {
            key: key.clone(),
            messages,
            warnings,
            anchor_count: records.len(),
        })
    }

    async fn load(
        &self,
        key: &ConversationKey,
        record: &AnchorRecord,
    ) -> Result<Arc<DecodedBatch>> {
        let cache_key = (key.ledger_key(), record.cid.clone(), record.commit_hash);
        if let Some(batch) = self.cache.get(&cache_key) {
            return Ok(batch);
        }

        let bytes = self.store.fetch(&record.cid).await?;
        if !hash::verify(&bytes, &record.commit_hash) {
            return Err(AnchorError::Corrupt(record.cid.clone()));
        }
        let batch = Arc::new(decode_batch(&bytes, key)?);

        self.cache.insert(cache_key, Arc::clone(&batch));
        Ok(batch)
    }
}

type BatchKey = (String, Cid, CommitHash);

/// Verified, decoded batches. Content addressing makes entries immutable, so
/// eviction is plain insertion order.
struct BatchCache {
    capacity: usize,
    inner: Mutex<BatchCacheInner>,
}

#[derive(Default)]
struct BatchCacheInner {
    batches: HashMap<BatchKey, Arc<DecodedBatch>>,
    order: VecDeque<BatchKey>,
}

impl BatchCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::default(),
        }
    }

    fn get(&self, key: &BatchKey) -> Option<Arc<DecodedBatch>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.batches.get(key).cloned()
    }

    fn insert(&self, key: BatchKey, batch: Arc<DecodedBatch>) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.batches.insert(key.clone(), batch).is_none() {
            inner.order.push_back(key);
        }
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.batches.remove(&oldest);
            }
        }
    }
}
