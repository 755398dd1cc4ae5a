//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the CLI works against a local IPFS node
//! and a ledger in the user's data directory with no configuration at all.

use std::path::PathBuf;
use std::time::Duration;

use anchorline_shared::constants::{
    DEFAULT_CONFIRM_TIMEOUT_MS, DEFAULT_FETCH_CONCURRENCY, DEFAULT_IPFS_API_URL,
    DEFAULT_IPFS_GATEWAY_URL, DEFAULT_LEDGER_PAGE_SIZE, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_STORE_TIMEOUT_MS,
};
use anchorline_shared::{Address, BatchShape};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Node API used for uploads.
    /// Env: `IPFS_API_URL`
    pub ipfs_api_url: String,

    /// Gateway used for fetches.
    /// Env: `IPFS_GATEWAY_URL`
    pub ipfs_gateway_url: String,

    /// Ledger database file. `None` means the platform data directory.
    /// Env: `LEDGER_DB_PATH`
    pub ledger_db_path: Option<PathBuf>,

    /// Address appends are signed as. Without one the client is read-only.
    /// Env: `SIGNER_ADDRESS`
    pub signer: Option<Address>,

    /// Env: `POLL_INTERVAL_MS`
    pub poll_interval: Duration,

    /// Per-request timeout against the content store.
    /// Env: `STORE_TIMEOUT_MS`
    pub store_timeout: Duration,

    /// How long an append waits for ledger finality.
    /// Env: `CONFIRM_TIMEOUT_MS`
    pub confirm_timeout: Duration,

    /// Env: `FETCH_CONCURRENCY`
    pub fetch_concurrency: usize,

    /// Env: `LEDGER_PAGE_SIZE`
    pub ledger_page_size: u32,

    /// Zero disables the anchor list cache.
    /// Env: `ANCHOR_CACHE_TTL_MS`
    pub anchor_cache_ttl: Duration,

    /// Write `{"messages": [...]}` instead of a bare array.
    /// Env: `BATCH_ENVELOPE` (true/false)
    pub batch_shape: BatchShape,

    /// Env: `LINK_PREVIOUS_CID` (true/false)
    pub link_previous_cid: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ipfs_api_url: DEFAULT_IPFS_API_URL.to_string(),
            ipfs_gateway_url: DEFAULT_IPFS_GATEWAY_URL.to_string(),
            ledger_db_path: None,
            signer: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            confirm_timeout: Duration::from_millis(DEFAULT_CONFIRM_TIMEOUT_MS),
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            ledger_page_size: DEFAULT_LEDGER_PAGE_SIZE,
            anchor_cache_ttl: Duration::ZERO,
            batch_shape: BatchShape::BareArray,
            link_previous_cid: true,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = var("IPFS_API_URL") {
            config.ipfs_api_url = url;
        }

        if let Some(url) = var("IPFS_GATEWAY_URL") {
            config.ipfs_gateway_url = url;
        }

        if let Some(path) = var("LEDGER_DB_PATH").filter(|p| !p.is_empty()) {
            config.ledger_db_path = Some(PathBuf::from(path));
        }

        if let Some(value) = var("SIGNER_ADDRESS").filter(|v| !v.trim().is_empty()) {
            match Address::parse(&value) {
                Ok(address) => config.signer = Some(address),
                Err(e) => {
                    tracing::warn!(
                        value = %value,
                        error = %e,
                        "Invalid SIGNER_ADDRESS, running read-only"
                    );
                }
            }
        }

        if let Some(ms) = parse_var::<u64>(&var, "POLL_INTERVAL_MS").filter(|ms| *ms > 0) {
            config.poll_interval = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var::<u64>(&var, "STORE_TIMEOUT_MS").filter(|ms| *ms > 0) {
            config.store_timeout = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var::<u64>(&var, "CONFIRM_TIMEOUT_MS").filter(|ms| *ms > 0) {
            config.confirm_timeout = Duration::from_millis(ms);
        }

        if let Some(n) = parse_var::<usize>(&var, "FETCH_CONCURRENCY").filter(|n| *n > 0) {
            config.fetch_concurrency = n;
        }

        if let Some(n) = parse_var::<u32>(&var, "LEDGER_PAGE_SIZE").filter(|n| *n > 0) {
            config.ledger_page_size = n;
        }

        if let Some(ms) = parse_var::<u64>(&var, "ANCHOR_CACHE_TTL_MS") {
            config.anchor_cache_ttl = Duration::from_millis(ms);
        }

        if let Some(val) = var("BATCH_ENVELOPE") {
            config.batch_shape = if is_truthy(&val) {
                BatchShape::Envelope
            } else {
                BatchShape::BareArray
            };
        }

        if let Some(val) = var("LINK_PREVIOUS_CID") {
            config.link_previous_cid = is_truthy(&val);
        }

        config
    }
}

fn parse_var<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let value = var(name)?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(value = %value, "Invalid {name}, using default");
            None
        }
    }
}

fn is_truthy(val: &str) -> bool {
    val != "false" && val != "0"
}
