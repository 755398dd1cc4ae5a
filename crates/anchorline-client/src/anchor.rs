//! Ledger anchoring: append and list pointer records per conversation key.
//!
//! [`LedgerAnchor`] wraps a [`Ledger`] with the client-side rules of the
//! protocol:
//!
//! - appends are submitted, then confirmed under a timeout. A timed-out
//!   confirmation is reported as `Unavailable` with the transaction id,
//!   because the transaction may still land. Nothing is ever retried here.
//! - a second append for a key that carries a `previous_cid` is refused
//!   while an earlier append for the same key is unconfirmed.
//!   [`LedgerAnchor::append_linked`] reads the head under the same guard, so
//!   the link it records is never stale.
//! - listing pages through the ledger and can be served from a short-lived
//!   cache, which is dropped for a key as soon as that key gets an append.
//!   A listing that was already running when the append happened is not
//!   written back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use anchorline_shared::constants::{DEFAULT_CONFIRM_TIMEOUT_MS, DEFAULT_LEDGER_PAGE_SIZE};
use anchorline_shared::{
    Address, AnchorError, AnchorRecord, Cid, CommitHash, ConversationKey, Result,
};
use anchorline_store::{AppendRequest, Ledger, PageRequest};

type InFlight = Arc<Mutex<HashMap<String, usize>>>;

pub struct LedgerAnchor {
    ledger: Arc<dyn Ledger>,
    confirm_timeout: Duration,
    page_size: u32,
    cache: Option<AnchorCache>,
    in_flight: InFlight,
}

impl LedgerAnchor {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            confirm_timeout: Duration::from_millis(DEFAULT_CONFIRM_TIMEOUT_MS),
            page_size: DEFAULT_LEDGER_PAGE_SIZE,
            cache: None,
            in_flight: Arc::default(),
        }
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// A zero TTL disables the cache.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = (!ttl.is_zero()).then(|| AnchorCache::new(ttl));
        self
    }

    pub fn signer(&self) -> Option<&Address> {
        self.ledger.signer()
    }

    /// Append one pointer record and wait for it to be final.
    ///
    /// `Unauthorized` and `Rejected` come back exactly as the ledger produced
    /// them. `Unavailable` means the outcome is unknown; only the caller can
    /// decide whether resubmitting risks a duplicate record.
    pub async fn append(
        &self,
        key: &ConversationKey,
        cid: Cid,
        commit_hash: CommitHash,
        previous_cid: Option<Cid>,
    ) -> Result<AnchorRecord> {
        let ledger_key = key.ledger_key();
        let _guard = InFlightGuard::acquire(&self.in_flight, &ledger_key, previous_cid.is_some())?;
        self.submit_and_confirm(key, cid, commit_hash, previous_cid).await
    }

    /// Append with `previous_cid` set to the current head of `key`.
    ///
    /// The head is read after the in-flight guard is taken and the guard is
    /// held until confirmation, so a concurrent linked append for the same
    /// key fails with `AppendInFlight` instead of recording a stale link.
    pub async fn append_linked(
        &self,
        key: &ConversationKey,
        cid: Cid,
        commit_hash: CommitHash,
    ) -> Result<AnchorRecord> {
        let ledger_key = key.ledger_key();
        let _guard = InFlightGuard::acquire(&self.in_flight, &ledger_key, true)?;
        let previous_cid = self.head(key).await?.map(|record| record.cid);
        self.submit_and_confirm(key, cid, commit_hash, previous_cid).await
    }

    async fn submit_and_confirm(
        &self,
        key: &ConversationKey,
        cid: Cid,
        commit_hash: CommitHash,
        previous_cid: Option<Cid>,
    ) -> Result<AnchorRecord> {
        let pending = self
            .ledger
            .submit(AppendRequest {
                key: key.clone(),
                cid,
                commit_hash,
                previous_cid,
            })
            .await?;

        debug!(tx_id = %pending.tx_id, key = %key, "Awaiting ledger confirmation");

        let confirmed =
            tokio::time::timeout(self.confirm_timeout, self.ledger.confirm(&pending)).await;

        // Whatever the outcome, a listing taken before this point may be stale.
        self.invalidate(key);

        match confirmed {
            Ok(Ok(record)) => {
                info!(
                    key = %key,
                    position = record.position,
                    cid = %record.cid,
                    "Anchor committed"
                );
                Ok(record)
            }
            Ok(Err(e)) => {
                warn!(tx_id = %pending.tx_id, key = %key, error = %e, "Anchor not confirmed");
                Err(e)
            }
            Err(_) => {
                warn!(
                    tx_id = %pending.tx_id,
                    key = %key,
                    timeout_ms = self.confirm_timeout.as_millis() as u64,
                    "Confirmation timed out"
                );
                Err(AnchorError::Unavailable(format!(
                    "confirmation of transaction {} timed out; it may still land",
                    pending.tx_id
                )))
            }
        }
    }

    /// Every record of `key`, oldest first.
    pub async fn list(&self, key: &ConversationKey) -> Result<Vec<AnchorRecord>> {
        if let Some(records) = self.cache.as_ref().and_then(|c| c.get(&key.ledger_key())) {
            debug!(key = %key, count = records.len(), "Anchor list served from cache");
            return Ok(records);
        }
        self.list_from_ledger(key).await
    }

    /// The most recent record of `key`, always read from the ledger.
    pub async fn head(&self, key: &ConversationKey) -> Result<Option<AnchorRecord>> {
        Ok(self.list_from_ledger(key).await?.pop())
    }

    pub fn invalidate(&self, key: &ConversationKey) {
        if let Some(cache) = &self.cache {
            cache.remove(&key.ledger_key());
        }
    }

    async fn list_from_ledger(&self, key: &ConversationKey) -> Result<Vec<AnchorRecord>> {
        let ledger_key = key.ledger_key();
        let generation = self.cache.as_ref().map(|c| c.generation(&ledger_key));

        let mut records: Vec<AnchorRecord> = Vec::new();
        let mut offset = 0u64;

        loop {
            let page = self
                .ledger
                .list_page(
                    key,
                    PageRequest {
                        offset,
                        limit: self.page_size,
                    },
                )
                .await?;
            let fetched = page.len();

            for record in page {
                if records.last().is_some_and(|last| record.position <= last.position) {
                    debug!(
                        key = %key,
                        position = record.position,
                        "Dropping record seen on a previous page"
                    );
                    continue;
                }
                records.push(record);
            }

            let next = records.last().map_or(0, |last| last.position + 1);
            if fetched < self.page_size as usize || next <= offset {
                break;
            }
            offset = next;
        }

        debug!(key = %key, count = records.len(), "Listed anchors");

        if let (Some(cache), Some(generation)) = (&self.cache, generation) {
            cache.insert(ledger_key, generation, records.clone());
        }
        Ok(records)
    }
}

struct AnchorCache {
    ttl: Duration,
    inner: Mutex<CacheInner>,
}

/// `generations` is bumped on every invalidation; a listing only lands in
/// `entries` if the generation it started under is still current.
#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, (Instant, Vec<AnchorRecord>)>,
    generations: HashMap<String, u64>,
}

impl AnchorCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::default(),
        }
    }

    fn inner(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, key: &str) -> Option<Vec<AnchorRecord>> {
        let mut inner = self.inner();
        match inner.entries.get(key) {
            Some((at, records)) if at.elapsed() < self.ttl => Some(records.clone()),
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn generation(&self, key: &str) -> u64 {
        self.inner().generations.get(key).copied().unwrap_or(0)
    }

    fn insert(&self, key: String, generation: u64, records: Vec<AnchorRecord>) {
        let mut inner = self.inner();
        if inner.generations.get(&key).copied().unwrap_or(0) != generation {
            debug!(key = %key, "Discarding listing taken before an append");
            return;
        }
        inner.entries.insert(key, (Instant::now(), records));
    }

    fn remove(&self, key: &str) {
        let mut inner = self.inner();
        inner.entries.remove(key);
        *inner.generations.entry(key.to_string()).or_insert(0) += 1;
    }
}

/// Counts unconfirmed appends per key; released on drop, including when the
/// append future is cancelled.
struct InFlightGuard {
    in_flight: InFlight,
    key: String,
}

impl InFlightGuard {
    fn acquire(in_flight: &InFlight, key: &str, dependent: bool) -> Result<Self> {
        let mut map = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let count = map.entry(key.to_string()).or_insert(0);
        if dependent && *count > 0 {
            return Err(AnchorError::AppendInFlight(key.to_string()));
        }
        *count += 1;
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            key: key.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = map.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                map.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anchorline_store::{PendingAppend, SqliteLedger};
    use async_trait::async_trait;

    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn dm_key() -> ConversationKey {
        ConversationKey::direct(addr("0xA"), addr("0xB")).unwrap()
    }

    fn ledger() -> SqliteLedger {
        SqliteLedger::open_in_memory(Some(addr("0xA"))).unwrap()
    }

    /// Delegates to a real ledger but can hold confirmations and page
    /// replies, and counts pages.
    struct SlowLedger {
        inner: SqliteLedger,
        confirm_delay: Duration,
        list_delay: Duration,
        pages: AtomicUsize,
    }

    #[async_trait]
    impl Ledger for SlowLedger {
        fn signer(&self) -> Option<&Address> {
            self.inner.signer()
        }

        async fn submit(&self, request: AppendRequest) -> Result<PendingAppend> {
            self.inner.submit(request).await
        }

        async fn confirm(&self, pending: &PendingAppend) -> Result<AnchorRecord> {
            tokio::time::sleep(self.confirm_delay).await;
            self.inner.confirm(pending).await
        }

        async fn list_page(
            &self,
            key: &ConversationKey,
            page: PageRequest,
        ) -> Result<Vec<AnchorRecord>> {
            self.pages.fetch_add(1, Ordering::SeqCst);
            let records = self.inner.list_page(key, page).await?;
            tokio::time::sleep(self.list_delay).await;
            Ok(records)
        }
    }

    fn slow(confirm_delay: Duration) -> Arc<SlowLedger> {
        Arc::new(SlowLedger {
            inner: ledger(),
            confirm_delay,
            list_delay: Duration::ZERO,
            pages: AtomicUsize::new(0),
        })
    }

    fn slow_lists(list_delay: Duration) -> Arc<SlowLedger> {
        Arc::new(SlowLedger {
            inner: ledger(),
            confirm_delay: Duration::ZERO,
            list_delay,
            pages: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_append_then_list() {
        let anchor = LedgerAnchor::new(Arc::new(ledger()));
        let key = dm_key();
        let rec = anchor
            .append(&key, Cid::new("c1"), CommitHash([1; 32]), None)
            .await
            .unwrap();
        assert_eq!(rec.position, 0);
        assert_eq!(anchor.list(&key).await.unwrap(), vec![rec.clone()]);
        assert_eq!(anchor.head(&key).await.unwrap(), Some(rec));
    }

    #[tokio::test]
    async fn test_unauthorized_surfaces_unmodified() {
        let anchor = LedgerAnchor::new(Arc::new(ledger().with_signer(addr("0xC"))));
        let err = anchor
            .append(&dm_key(), Cid::new("c1"), CommitHash([1; 32]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AnchorError::Unauthorized(_)));
        assert!(anchor.list(&dm_key()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_pages_through_history() {
        let ledger = slow(Duration::ZERO);
        let anchor = LedgerAnchor::new(ledger.clone()).with_page_size(2);
        let key = dm_key();
        for i in 0..5 {
            anchor
                .append(&key, Cid::new(format!("c{i}")), CommitHash([i; 32]), None)
                .await
                .unwrap();
        }

        let records = anchor.list(&key).await.unwrap();
        let positions: Vec<u64> = records.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4]);
        // 2 + 2 + 1
        assert_eq!(ledger.pages.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exact_page_multiple_terminates() {
        let anchor = LedgerAnchor::new(Arc::new(ledger())).with_page_size(2);
        let key = dm_key();
        for i in 0..4 {
            anchor
                .append(&key, Cid::new(format!("c{i}")), CommitHash([i; 32]), None)
                .await
                .unwrap();
        }
        assert_eq!(anchor.list(&key).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_confirm_timeout_is_unavailable() {
        let anchor = LedgerAnchor::new(slow(Duration::from_millis(500)))
            .with_confirm_timeout(Duration::from_millis(20));
        let err = anchor
            .append(&dm_key(), Cid::new("c1"), CommitHash([1; 32]), None)
            .await
            .unwrap_err();
        match err {
            AnchorError::Unavailable(msg) => assert!(msg.contains("may still land")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dependent_append_refused_while_in_flight() {
        let anchor = Arc::new(LedgerAnchor::new(slow(Duration::from_millis(200))));
        let key = dm_key();

        let first = {
            let anchor = anchor.clone();
            let key = key.clone();
            tokio::spawn(async move {
                anchor
                    .append(&key, Cid::new("c1"), CommitHash([1; 32]), None)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = anchor
            .append(&key, Cid::new("c2"), CommitHash([2; 32]), Some(Cid::new("c0")))
            .await
            .unwrap_err();
        assert_eq!(err, AnchorError::AppendInFlight(key.ledger_key()));

        let first = first.await.unwrap().unwrap();
        anchor
            .append(&key, Cid::new("c2"), CommitHash([2; 32]), Some(first.cid))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_append_releases_guard() {
        let anchor = LedgerAnchor::new(slow(Duration::from_millis(100)));
        let key = dm_key();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            anchor.append(&key, Cid::new("c1"), CommitHash([1; 32]), None),
        )
        .await;
        assert!(cancelled.is_err());

        // The abandoned transaction never confirms, so the next one takes position 0.
        let rec = anchor
            .append(&key, Cid::new("c2"), CommitHash([2; 32]), Some(Cid::new("c1")))
            .await
            .unwrap();
        assert_eq!(rec.position, 0);
    }

    #[tokio::test]
    async fn test_cache_serves_then_invalidates_on_append() {
        let ledger = slow(Duration::ZERO);
        let anchor = LedgerAnchor::new(ledger.clone()).with_cache_ttl(Duration::from_secs(60));
        let key = dm_key();

        assert!(anchor.list(&key).await.unwrap().is_empty());
        assert!(anchor.list(&key).await.unwrap().is_empty());
        assert_eq!(ledger.pages.load(Ordering::SeqCst), 1);

        anchor
            .append(&key, Cid::new("c1"), CommitHash([1; 32]), None)
            .await
            .unwrap();
        assert_eq!(anchor.list(&key).await.unwrap().len(), 1);
        assert_eq!(ledger.pages.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_expires() {
        let ledger = slow(Duration::ZERO);
        let anchor = LedgerAnchor::new(ledger.clone()).with_cache_ttl(Duration::from_millis(10));
        let key = dm_key();

        anchor.list(&key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        anchor.list(&key).await.unwrap();
        assert_eq!(ledger.pages.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_listing_overtaken_by_append_is_not_cached() {
        let anchor = Arc::new(
            LedgerAnchor::new(slow_lists(Duration::from_millis(100)))
                .with_cache_ttl(Duration::from_secs(60)),
        );
        let key = dm_key();

        let stale = {
            let anchor = anchor.clone();
            let key = key.clone();
            tokio::spawn(async move { anchor.list(&key).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        anchor
            .append(&key, Cid::new("c1"), CommitHash([1; 32]), None)
            .await
            .unwrap();
        assert!(stale.await.unwrap().unwrap().is_empty());

        assert_eq!(anchor.list(&key).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_linked_records_current_head() {
        let anchor = LedgerAnchor::new(Arc::new(ledger()));
        let key = dm_key();

        let first = anchor
            .append_linked(&key, Cid::new("c1"), CommitHash([1; 32]))
            .await
            .unwrap();
        assert_eq!(first.previous_cid, None);

        let second = anchor
            .append_linked(&key, Cid::new("c2"), CommitHash([2; 32]))
            .await
            .unwrap();
        assert_eq!(second.previous_cid, Some(first.cid));
    }

    #[tokio::test]
    async fn test_concurrent_linked_appends_never_share_a_head() {
        let anchor = Arc::new(LedgerAnchor::new(slow(Duration::from_millis(100))));
        let key = dm_key();

        let first = {
            let anchor = anchor.clone();
            let key = key.clone();
            tokio::spawn(async move {
                anchor
                    .append_linked(&key, Cid::new("c1"), CommitHash([1; 32]))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = anchor
            .append_linked(&key, Cid::new("c2"), CommitHash([2; 32]))
            .await
            .unwrap_err();
        assert_eq!(err, AnchorError::AppendInFlight(key.ledger_key()));

        let first = first.await.unwrap().unwrap();
        let second = anchor
            .append_linked(&key, Cid::new("c2"), CommitHash([2; 32]))
            .await
            .unwrap();
        assert_eq!(second.previous_cid, Some(first.cid));
    }
}
