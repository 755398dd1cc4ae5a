//! `anchorline`: send and read ledger-anchored conversations.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use anchorline_client::commands::{self, Target};
use anchorline_client::{ClientConfig, ClientState};

#[derive(Debug, Parser)]
#[command(name = "anchorline", version, about)]
struct Cli {
    /// Address to sign appends as. Overrides SIGNER_ADDRESS.
    #[arg(long, global = true, env = "SIGNER_ADDRESS")]
    signer: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a direct message.
    SendDm {
        peer: String,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Send a message to a server channel.
    SendChannel {
        server_id: u64,
        channel_id: u64,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Commit a JSON batch file exactly as written.
    CommitFile {
        path: PathBuf,
        #[command(subcommand)]
        target: Target,
    },
    /// Print a conversation.
    History {
        #[command(subcommand)]
        target: Target,
    },
    /// Follow a conversation, printing new messages as they are anchored.
    Watch {
        #[command(subcommand)]
        target: Target,
    },
    /// Allow an address to post in a server's channels.
    AddMember { server_id: u64, address: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    anchorline_client::init_tracing();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(raw) = cli.signer.as_deref().filter(|s| !s.trim().is_empty()) {
        config.signer = Some(anchorline_shared::Address::parse(raw)?);
    }
    tracing::debug!(?config, "Loaded configuration");

    let state = ClientState::open(config)?;

    match cli.command {
        Command::SendDm { peer, text } => {
            commands::send::send_dm(&state, &peer, &text.join(" ")).await
        }
        Command::SendChannel {
            server_id,
            channel_id,
            text,
        } => {
            commands::send::send_channel(&state, server_id, channel_id, &text.join(" ")).await
        }
        Command::CommitFile { path, target } => {
            commands::send::commit_file(&state, &path, &target).await
        }
        Command::History { target } => commands::history::history(&state, &target).await,
        Command::Watch { target } => commands::watch::watch(&state, &target).await,
        Command::AddMember { server_id, address } => {
            commands::members::add_member(&state, server_id, &address)
        }
    }
}
