use thiserror::Error;

use crate::types::Cid;

/// Failure taxonomy shared by every layer of the anchoring protocol.
///
/// `InvalidBatch`, `Unauthorized` and `Rejected` are never retried
/// automatically: a retry could land a second ledger transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnchorError {
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Ledger rejected transaction: {0}")]
    Rejected(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Content not found: {0}")]
    NotFound(Cid),

    #[error("Corrupt blob {0}: commit hash mismatch")]
    Corrupt(Cid),

    #[error("Append already in flight for {0}")]
    AppendInFlight(String),
}

impl AnchorError {
    /// Errors that only affect one anchor during assembly.
    pub fn is_isolated(&self) -> bool {
        matches!(
            self,
            AnchorError::Unavailable(_)
                | AnchorError::NotFound(_)
                | AnchorError::Corrupt(_)
                | AnchorError::InvalidBatch(_)
        )
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, AnchorError>;
