//! The wired-up client: content store, ledger and the services built on them.

use std::sync::Arc;

use anchorline_shared::Result;
use anchorline_store::{ContentStore, HttpContentStore, SqliteLedger};

use crate::anchor::LedgerAnchor;
use crate::assembler::ConversationAssembler;
use crate::committer::Committer;
use crate::config::ClientConfig;
use crate::poller::Poller;

pub struct ClientState {
    pub config: ClientConfig,

    /// Kept concrete for local administration such as membership.
    pub ledger: SqliteLedger,

    pub anchors: Arc<LedgerAnchor>,
    pub assembler: Arc<ConversationAssembler>,
    pub committer: Committer,
}

impl ClientState {
    /// Open the HTTP content store and the on-disk ledger named by `config`.
    pub fn open(config: ClientConfig) -> Result<Self> {
        let store = HttpContentStore::new(
            &config.ipfs_api_url,
            &config.ipfs_gateway_url,
            config.store_timeout,
        )?;

        let path = match &config.ledger_db_path {
            Some(path) => path.clone(),
            None => SqliteLedger::default_path()?,
        };
        let ledger = SqliteLedger::open_at(&path, config.signer.clone())?;
        tracing::debug!(signer = ?config.signer, "Client backends ready");

        Ok(Self::with_backends(config, Arc::new(store), ledger))
    }

    /// Build the client services over the given collaborators.
    pub fn with_backends(
        config: ClientConfig,
        store: Arc<dyn ContentStore>,
        ledger: SqliteLedger,
    ) -> Self {
        let anchors = Arc::new(
            LedgerAnchor::new(Arc::new(ledger.clone()))
                .with_confirm_timeout(config.confirm_timeout)
                .with_page_size(config.ledger_page_size)
                .with_cache_ttl(config.anchor_cache_ttl),
        );

        let assembler = Arc::new(
            ConversationAssembler::new(Arc::clone(&store), Arc::clone(&anchors))
                .with_fetch_concurrency(config.fetch_concurrency),
        );

        let committer = Committer::new(store, Arc::clone(&anchors))
            .with_shape(config.batch_shape)
            .with_previous_links(config.link_previous_cid);

        Self {
            config,
            ledger,
            anchors,
            assembler,
            committer,
        }
    }

    pub fn poller(&self) -> Poller {
        Poller::new(Arc::clone(&self.assembler), self.config.poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use anchorline_shared::{Address, BatchShape, ConversationKey, Message};
    use anchorline_store::{ContentStore, MemoryContentStore};

    use super::*;

    #[tokio::test]
    async fn test_config_flows_into_services() {
        let signer = Address::parse("0xA").unwrap();
        let config = ClientConfig {
            signer: Some(signer.clone()),
            batch_shape: BatchShape::Envelope,
            link_previous_cid: false,
            ..ClientConfig::default()
        };
        let store = MemoryContentStore::new();
        let ledger = SqliteLedger::open_in_memory(Some(signer.clone())).unwrap();
        let state = ClientState::with_backends(config, Arc::new(store.clone()), ledger);

        let peer = Address::parse("0xB").unwrap();
        let key = ConversationKey::direct(signer.clone(), peer.clone()).unwrap();
        state
            .committer
            .commit(&key, &[Message::direct(signer.clone(), peer.clone(), "one", 1)])
            .await
            .unwrap();
        let second = state
            .committer
            .commit(&key, &[Message::direct(signer, peer, "two", 2)])
            .await
            .unwrap();

        assert_eq!(second.previous_cid, None);
        let blob = store.fetch(&second.cid).await.unwrap();
        assert!(blob.starts_with(br#"{"messages":["#));

        let conversation = state.assembler.assemble(&key).await.unwrap();
        assert_eq!(conversation.messages.len(), 2);
    }
}
