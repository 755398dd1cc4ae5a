//! # anchorline-store
//!
//! The two external collaborators of the anchoring protocol, behind traits:
//!
//! - [`ContentStore`] keeps immutable blobs. [`HttpContentStore`] talks to an
//!   IPFS-compatible node or gateway, [`MemoryContentStore`] keeps blobs in
//!   process.
//! - [`Ledger`] records anchor pointers. [`SqliteLedger`] is a local,
//!   append-only implementation with the same authorization and ordering
//!   guarantees as the on-chain contracts.

pub mod content;
pub mod ipfs;
pub mod ledger;
pub mod memory;
pub mod migrations;
pub mod sqlite_ledger;

mod error;

pub use content::{content_address, is_content_address, ContentStore};
pub use error::StoreError;
pub use ipfs::HttpContentStore;
pub use ledger::{AppendRequest, Ledger, PageRequest, PendingAppend};
pub use memory::MemoryContentStore;
pub use sqlite_ledger::SqliteLedger;
