//! Write path: batch, upload, anchor.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use anchorline_shared::{
    decode_batch, hash, Address, AnchorError, AnchorRecord, BatchBuilder, BatchShape,
    ConversationKey, Message, Result,
};
use anchorline_store::ContentStore;

use crate::anchor::LedgerAnchor;

/// Commits batches of messages for a conversation.
///
/// Each commit serializes the batch once, hashes exactly the bytes that are
/// uploaded and appends one anchor. The call returns only after the anchor
/// is confirmed, so a subsequent assembly sees the batch.
pub struct Committer {
    builder: BatchBuilder,
    store: Arc<dyn ContentStore>,
    anchors: Arc<LedgerAnchor>,
    link_previous: bool,
}

impl Committer {
    pub fn new(store: Arc<dyn ContentStore>, anchors: Arc<LedgerAnchor>) -> Self {
        Self {
            builder: BatchBuilder::default(),
            store,
            anchors,
            link_previous: true,
        }
    }

    pub fn with_shape(mut self, shape: BatchShape) -> Self {
        self.builder = BatchBuilder::new(shape);
        self
    }

    /// Record the locator of the current head as `previous_cid`.
    pub fn with_previous_links(mut self, link_previous: bool) -> Self {
        self.link_previous = link_previous;
        self
    }

    pub async fn commit(
        &self,
        key: &ConversationKey,
        messages: &[Message],
    ) -> Result<AnchorRecord> {
        let bytes = self.builder.build(key, messages)?;
        debug!(key = %key, messages = messages.len(), bytes = bytes.len(), "Batch serialized");
        self.anchor_bytes(key, Bytes::from(bytes)).await
    }

    /// Commit a pre-serialized batch as-is.
    ///
    /// The bytes must decode to at least one message of `key` with no
    /// unusable entries; readers would otherwise drop part of it.
    pub async fn commit_raw(&self, key: &ConversationKey, bytes: Bytes) -> Result<AnchorRecord> {
        let decoded = decode_batch(&bytes, key)?;
        if decoded.messages.is_empty() {
            return Err(AnchorError::InvalidBatch(format!("no messages for {key}")));
        }
        if decoded.skipped > 0 {
            return Err(AnchorError::InvalidBatch(format!(
                "{} entries do not belong to {key}",
                decoded.skipped
            )));
        }
        self.anchor_bytes(key, bytes).await
    }

    /// Send one direct message from the ledger signer.
    pub async fn send_direct(&self, to: Address, text: impl Into<String>) -> Result<AnchorRecord> {
        let sender = self.sender()?;
        let message = Message::direct(sender, to, text, Message::now_ms());
        let key = message.conversation_key()?;
        self.commit(&key, &[message]).await
    }

    /// Send one channel message from the ledger signer.
    pub async fn send_channel(
        &self,
        server_id: u64,
        channel_id: u64,
        text: impl Into<String>,
    ) -> Result<AnchorRecord> {
        let sender = self.sender()?;
        let message = Message::channel(sender, server_id, channel_id, text, Message::now_ms());
        let key = ConversationKey::channel(server_id, channel_id);
        self.commit(&key, &[message]).await
    }

    fn sender(&self) -> Result<Address> {
        self.anchors
            .signer()
            .cloned()
            .ok_or_else(|| AnchorError::Unauthorized("no signer configured".into()))
    }

    async fn anchor_bytes(&self, key: &ConversationKey, bytes: Bytes) -> Result<AnchorRecord> {
        let commit_hash = hash::compute(&bytes);

        let size = bytes.len();
        let cid = self.store.upload(bytes).await?;
        info!(key = %key, cid = %cid, size, hash = %commit_hash, "Batch uploaded");

        if self.link_previous {
            self.anchors.append_linked(key, cid, commit_hash).await
        } else {
            self.anchors.append(key, cid, commit_hash, None).await
        }
    }
}
