//! Ledger contract.
//!
//! The ledger is an external, append-only, ordered, authenticated record
//! store. Appends are two-phase: [`Ledger::submit`] hands back a pending
//! handle as soon as the transaction is accepted for processing, and
//! [`Ledger::confirm`] suspends until it is final. Each confirmed
//! transaction produces exactly one [`AnchorRecord`].

use async_trait::async_trait;

use anchorline_shared::{Address, AnchorRecord, Cid, CommitHash, ConversationKey, Result};

/// What a participant asks the ledger to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRequest {
    pub key: ConversationKey,
    pub cid: Cid,
    pub commit_hash: CommitHash,
    pub previous_cid: Option<Cid>,
}

/// Handle of a submitted, not yet final, append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAppend {
    pub tx_id: String,
    pub key: ConversationKey,
    pub cid: Cid,
}

/// Window over a key's records, by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u32,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Identity appends are authorized against; `None` for read-only handles.
    fn signer(&self) -> Option<&Address>;

    /// Fails with `Unauthorized` when the signer is not a participant of the
    /// key and with `Rejected` when the ledger refuses the transaction.
    async fn submit(&self, request: AppendRequest) -> Result<PendingAppend>;

    /// Suspends until the transaction is final. Atomic: either the record
    /// exists afterwards or nothing changed.
    async fn confirm(&self, pending: &PendingAppend) -> Result<AnchorRecord>;

    /// Records of `key` with `position >= page.offset`, oldest first, at
    /// most `page.limit` of them.
    async fn list_page(&self, key: &ConversationKey, page: PageRequest)
        -> Result<Vec<AnchorRecord>>;
}
