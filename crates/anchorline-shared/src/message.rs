use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Address, ConversationKey};

/// Where a message is addressed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageTarget {
    Direct(Address),
    Channel { server_id: u64, channel_id: u64 },
}

/// A single chat message. Immutable once part of a committed batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub sender: Address,
    pub target: MessageTarget,
    pub content: String,
    /// Milliseconds since the Unix epoch, as reported by the sender.
    pub timestamp_ms: u64,
}

impl Message {
    pub fn direct(
        sender: Address,
        receiver: Address,
        content: impl Into<String>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            sender,
            target: MessageTarget::Direct(receiver),
            content: content.into(),
            timestamp_ms,
        }
    }

    pub fn channel(
        sender: Address,
        server_id: u64,
        channel_id: u64,
        content: impl Into<String>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            sender,
            target: MessageTarget::Channel {
                server_id,
                channel_id,
            },
            content: content.into(),
            timestamp_ms,
        }
    }

    /// Current wall-clock time in epoch milliseconds.
    pub fn now_ms() -> u64 {
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
    }

    pub fn conversation_key(&self) -> Result<ConversationKey> {
        match &self.target {
            MessageTarget::Direct(receiver) => {
                ConversationKey::direct(self.sender.clone(), receiver.clone())
            }
            MessageTarget::Channel {
                server_id,
                channel_id,
            } => Ok(ConversationKey::channel(*server_id, *channel_id)),
        }
    }

    pub fn belongs_to(&self, key: &ConversationKey) -> bool {
        self.conversation_key().is_ok_and(|k| &k == key)
    }
}
