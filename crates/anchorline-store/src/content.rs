//! Content store contract.
//!
//! A content store keeps immutable blobs and hands out locators for them.
//! Fetches return raw bytes; integrity is checked downstream against the
//! commit hash recorded on the ledger, never against the locator.

use async_trait::async_trait;
use bytes::Bytes;

use anchorline_shared::{Cid, Result};

/// Prefix of locators issued by anchorline's own stores.
pub const CONTENT_ADDRESS_PREFIX: &str = "b3";

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store an immutable blob and return its locator.
    async fn upload(&self, bytes: Bytes) -> Result<Cid>;

    /// Retrieve a blob. Idempotent and side-effect free.
    ///
    /// Fails with `NotFound` when the locator is unknown and `Unavailable`
    /// on network errors or timeouts.
    async fn fetch(&self, cid: &Cid) -> Result<Bytes>;
}

/// Locator for `bytes` in the `b3<hex>` scheme used by the in-memory store
/// and the gateway. Identical bytes always get the same locator.
pub fn content_address(bytes: &[u8]) -> Cid {
    Cid(format!(
        "{CONTENT_ADDRESS_PREFIX}{}",
        blake3::hash(bytes).to_hex()
    ))
}

/// Whether `cid` is well-formed in the `b3<hex>` scheme.
pub fn is_content_address(cid: &str) -> bool {
    cid.strip_prefix(CONTENT_ADDRESS_PREFIX).is_some_and(|hex| {
        hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    })
}
