//! Commands that append to a conversation.

use std::path::Path;

use anyhow::Context;
use bytes::Bytes;

use anchorline_shared::{Address, AnchorRecord};

use super::Target;
use crate::state::ClientState;

pub async fn send_dm(state: &ClientState, peer: &str, text: &str) -> anyhow::Result<()> {
    let peer = Address::parse(peer).context("invalid peer address")?;
    let record = state.committer.send_direct(peer, text).await?;
    report(&record);
    Ok(())
}

pub async fn send_channel(
    state: &ClientState,
    server_id: u64,
    channel_id: u64,
    text: &str,
) -> anyhow::Result<()> {
    let record = state
        .committer
        .send_channel(server_id, channel_id, text)
        .await?;
    report(&record);
    Ok(())
}

/// Commit a file holding a JSON batch, byte for byte.
pub async fn commit_file(state: &ClientState, path: &Path, target: &Target) -> anyhow::Result<()> {
    let key = target.resolve(state.config.signer.as_ref())?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let record = state.committer.commit_raw(&key, Bytes::from(bytes)).await?;
    report(&record);
    Ok(())
}

fn report(record: &AnchorRecord) {
    println!(
        "Anchored {} at position {} (cid {}, hash {})",
        record.key, record.position, record.cid, record.commit_hash
    );
}
