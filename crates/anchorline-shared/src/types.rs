use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{CHANNEL_KEY_PREFIX, COMMIT_HASH_SIZE, DM_KEY_PREFIX};
use crate::error::{AnchorError, Result};

// Account address, normalized to trimmed lowercase so "0xAB" == "0xab"
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    pub fn parse(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(AnchorError::InvalidBatch("empty address".into()));
        }
        if normalized.contains(':') || normalized.chars().any(char::is_whitespace) {
            return Err(AnchorError::InvalidBatch(format!(
                "invalid address: {normalized}"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 10 {
            return self.0.clone();
        }
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Locator issued by the content store. Never trusted for integrity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Cid(pub String);

impl Cid {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// 32-byte fingerprint over exact batch bytes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CommitHash(pub [u8; COMMIT_HASH_SIZE]);

impl CommitHash {
    /// `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        if bytes.len() != COMMIT_HASH_SIZE {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; COMMIT_HASH_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Stable identifier of a conversation on the ledger.
///
/// Direct keys are canonical: the pair is stored sorted, so `(A, B)` and
/// `(B, A)` build the same key and the ledger never has to be probed twice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    Direct { low: Address, high: Address },
    Channel { server_id: u64, channel_id: u64 },
}

impl ConversationKey {
    pub fn direct(a: Address, b: Address) -> Result<Self> {
        if a == b {
            return Err(AnchorError::InvalidBatch(format!(
                "direct conversation needs two distinct addresses, got {a} twice"
            )));
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(Self::Direct { low, high })
    }

    pub fn channel(server_id: u64, channel_id: u64) -> Self {
        Self::Channel {
            server_id,
            channel_id,
        }
    }

    /// Whether `address` is one of the two parties of a direct key.
    /// Always false for channels; membership there is the ledger's business.
    pub fn is_party(&self, address: &Address) -> bool {
        match self {
            Self::Direct { low, high } => low == address || high == address,
            Self::Channel { .. } => false,
        }
    }

    /// The other party of a direct key.
    pub fn counterpart(&self, address: &Address) -> Option<&Address> {
        match self {
            Self::Direct { low, high } if low == address => Some(high),
            Self::Direct { low, high } if high == address => Some(low),
            _ => None,
        }
    }

    /// Textual form used as the ledger key: `dm:<low>:<high>` or
    /// `channel:<server>:<channel>`.
    pub fn ledger_key(&self) -> String {
        match self {
            Self::Direct { low, high } => format!("{DM_KEY_PREFIX}:{low}:{high}"),
            Self::Channel {
                server_id,
                channel_id,
            } => format!("{CHANNEL_KEY_PREFIX}:{server_id}:{channel_id}"),
        }
    }

    pub fn from_ledger_key(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let (Some(kind), Some(first), Some(second)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(AnchorError::InvalidBatch(format!("malformed ledger key: {s}")));
        };
        match kind {
            DM_KEY_PREFIX => Self::direct(Address::parse(first)?, Address::parse(second)?),
            CHANNEL_KEY_PREFIX => {
                let parse = |v: &str| {
                    v.parse::<u64>().map_err(|e| {
                        AnchorError::InvalidBatch(format!("malformed ledger key {s}: {e}"))
                    })
                };
                Ok(Self::channel(parse(first)?, parse(second)?))
            }
            other => Err(AnchorError::InvalidBatch(format!(
                "unknown conversation kind: {other}"
            ))),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ledger_key())
    }
}

/// Ledger entry binding a conversation key to a `(cid, commit_hash)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnchorRecord {
    pub key: ConversationKey,
    /// 0-based index in the key's ledger order.
    pub position: u64,
    pub cid: Cid,
    pub commit_hash: CommitHash,
    pub previous_cid: Option<Cid>,
    pub submitter: Address,
}
