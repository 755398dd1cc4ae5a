//! # anchorline-client
//!
//! Client side of the anchoring protocol: commit message batches to a
//! content store and anchor them on a ledger, then rebuild conversations
//! from those anchors. The `anchorline` binary is a thin CLI over this.

pub mod anchor;
pub mod assembler;
pub mod commands;
pub mod committer;
pub mod config;
pub mod poller;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

use tracing_subscriber::{fmt, EnvFilter};

pub use anchor::LedgerAnchor;
pub use assembler::{AssemblyWarning, Conversation, ConversationAssembler};
pub use committer::Committer;
pub use config::ClientConfig;
pub use poller::{PollUpdate, Poller};
pub use state::ClientState;

/// Install the global tracing subscriber. Honors `RUST_LOG`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,anchorline_client=debug,anchorline_store=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
