//! Shared fixtures for the client tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use anchorline_shared::{Address, Cid, ConversationKey, Result};
use anchorline_store::{ContentStore, MemoryContentStore, SqliteLedger};

use crate::anchor::LedgerAnchor;
use crate::assembler::ConversationAssembler;
use crate::committer::Committer;

pub(crate) fn addr(s: &str) -> Address {
    Address::parse(s).unwrap()
}

/// In-memory ledger and store wired into the full client stack.
pub(crate) struct Fixture {
    pub ledger: SqliteLedger,
    pub store: MemoryContentStore,
    pub anchors: Arc<LedgerAnchor>,
    pub assembler: ConversationAssembler,
    pub committer: Committer,
    signer: Address,
}

impl Fixture {
    pub fn new(signer: &str) -> Self {
        let signer = addr(signer);
        let ledger = SqliteLedger::open_in_memory(Some(signer.clone())).unwrap();
        let store = MemoryContentStore::new();
        let anchors = Arc::new(LedgerAnchor::new(Arc::new(ledger.clone())));
        let assembler = ConversationAssembler::new(Arc::new(store.clone()), anchors.clone());
        let committer = Committer::new(Arc::new(store.clone()), anchors.clone());
        Self {
            ledger,
            store,
            anchors,
            assembler,
            committer,
            signer,
        }
    }

    pub fn dm_key(&self, other: &str) -> ConversationKey {
        ConversationKey::direct(self.signer.clone(), addr(other)).unwrap()
    }

    /// A committer for the same ledger and store, signing as someone else.
    pub fn committer_as(&self, signer: &str) -> Committer {
        let ledger = self.ledger.with_signer(addr(signer));
        let anchors = Arc::new(LedgerAnchor::new(Arc::new(ledger)));
        Committer::new(Arc::new(self.store.clone()), anchors)
    }
}

/// Delays every upload and fetch, and records how many fetches overlap.
pub(crate) struct SlowStore {
    inner: MemoryContentStore,
    delay: Duration,
    current: AtomicUsize,
    pub peak: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl SlowStore {
    pub fn new(inner: MemoryContentStore, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContentStore for SlowStore {
    async fn upload(&self, bytes: Bytes) -> Result<Cid> {
        tokio::time::sleep(self.delay).await;
        self.inner.upload(bytes).await
    }

    async fn fetch(&self, cid: &Cid) -> Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.inner.fetch(cid).await
    }
}
