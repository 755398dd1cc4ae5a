//! # anchorline-shared
//!
//! Pure types and functions shared by every anchorline crate: the data
//! model, the error taxonomy, canonical batch serialization and the commit
//! hash. Nothing in here performs I/O.

pub mod batch;
pub mod constants;
pub mod error;
pub mod hash;
pub mod message;
pub mod types;

pub use batch::{decode_batch, BatchBuilder, BatchShape, DecodedBatch, FIELD_PRECEDENCE};
pub use error::{AnchorError, Result};
pub use message::{Message, MessageTarget};
pub use types::{Address, AnchorRecord, Cid, CommitHash, ConversationKey};
