/// Application name
pub const APP_NAME: &str = "anchorline";

/// Commit hash (BLAKE3) size in bytes
pub const COMMIT_HASH_SIZE: usize = 32;

/// Ledger key prefix for direct-message conversations
pub const DM_KEY_PREFIX: &str = "dm";

/// Ledger key prefix for server channel conversations
pub const CHANNEL_KEY_PREFIX: &str = "channel";

/// Envelope field wrapping the message array in channel batches
pub const ENVELOPE_FIELD: &str = "messages";

/// Default IPFS HTTP API endpoint (upload)
pub const DEFAULT_IPFS_API_URL: &str = "http://127.0.0.1:5001";

/// Default IPFS gateway endpoint (fetch)
pub const DEFAULT_IPFS_GATEWAY_URL: &str = "http://127.0.0.1:8080";

/// Default poll interval for the active conversation in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Default per-request timeout against the content store in milliseconds
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 30_000;

/// Default wait for ledger finality in milliseconds
pub const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 60_000;

/// Unconfirmed local ledger submissions older than this are discarded (24 h)
pub const PENDING_APPEND_EXPIRY_SECS: i64 = 24 * 60 * 60;

/// Default number of anchors fetched concurrently during assembly
pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;

/// Default number of anchor records requested per ledger page
pub const DEFAULT_LEDGER_PAGE_SIZE: u32 = 100;

/// Verified batches kept in memory between polls
pub const DEFAULT_BATCH_CACHE_CAPACITY: usize = 512;

/// Maximum blob size accepted by the gateway (50 MiB)
pub const MAX_BLOB_SIZE: usize = 50 * 1024 * 1024;

/// Default HTTP port of the content store gateway
pub const DEFAULT_HTTP_PORT: u16 = 8080;
