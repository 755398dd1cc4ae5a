//! CLI command handlers.
//!
//! Each sub-module groups related commands. Handlers take the wired-up
//! [`ClientState`](crate::state::ClientState) and report failures through
//! `anyhow` so the binary can print them with context.

pub mod history;
pub mod members;
pub mod send;
pub mod watch;

use anyhow::{anyhow, Context};
use clap::Subcommand;

use anchorline_shared::{Address, ConversationKey};

/// Which conversation a command operates on.
#[derive(Debug, Clone, Subcommand)]
pub enum Target {
    /// Direct conversation with a peer.
    Dm {
        peer: String,
        /// Read the conversation as this address instead of the signer.
        #[arg(long = "as", value_name = "ADDRESS")]
        as_address: Option<String>,
    },
    /// Channel of a server.
    Channel { server_id: u64, channel_id: u64 },
}

impl Target {
    pub fn resolve(&self, signer: Option<&Address>) -> anyhow::Result<ConversationKey> {
        match self {
            Target::Dm { peer, as_address } => {
                let me = match as_address {
                    Some(raw) => Address::parse(raw).context("invalid --as address")?,
                    None => signer
                        .cloned()
                        .ok_or_else(|| anyhow!("no SIGNER_ADDRESS configured; pass --as"))?,
                };
                let peer = Address::parse(peer).context("invalid peer address")?;
                Ok(ConversationKey::direct(me, peer)?)
            }
            Target::Channel {
                server_id,
                channel_id,
            } => Ok(ConversationKey::channel(*server_id, *channel_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[test]
    fn test_dm_defaults_to_signer() {
        let target = Target::Dm {
            peer: "0xB".into(),
            as_address: None,
        };
        let key = target.resolve(Some(&addr("0xA"))).unwrap();
        assert_eq!(key.ledger_key(), "dm:0xa:0xb");
        assert!(target.resolve(None).is_err());
    }

    #[test]
    fn test_dm_as_overrides_signer() {
        let target = Target::Dm {
            peer: "0xA".into(),
            as_address: Some("0xC".into()),
        };
        let key = target.resolve(Some(&addr("0xB"))).unwrap();
        assert_eq!(key.ledger_key(), "dm:0xa:0xc");
    }

    #[test]
    fn test_channel_needs_no_signer() {
        let target = Target::Channel {
            server_id: 3,
            channel_id: 4,
        };
        assert_eq!(target.resolve(None).unwrap().ledger_key(), "channel:3:4");
    }
}
