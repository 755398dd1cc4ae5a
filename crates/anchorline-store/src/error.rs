use anchorline_shared::AnchorError;
use thiserror::Error;

/// Failures of the SQLite ledger's own plumbing, before they are translated
/// into the protocol's [`AnchorError`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("ledger database: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("no platform data directory for the ledger database")]
    NoDataDir,

    #[error("ledger file: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger migration v{version:03} failed: {reason}")]
    Migration { version: u32, reason: String },

    #[error("ledger connection lock poisoned")]
    LockPoisoned,
}

// A local ledger that cannot be read or written is, to its callers, an
// unreachable ledger.
impl From<StoreError> for AnchorError {
    fn from(e: StoreError) -> Self {
        AnchorError::Unavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
