//! Follow a conversation until interrupted.

use tracing::info;

use anchorline_shared::Message;

use super::history::{format_message, render_warnings};
use super::Target;
use crate::state::ClientState;

pub async fn watch(state: &ClientState, target: &Target) -> anyhow::Result<()> {
    let key = target.resolve(state.config.signer.as_ref())?;
    let mut poller = state.poller();
    let mut updates = poller.activate(key.clone());

    let mut shown: Vec<Message> = Vec::new();
    let mut last_warnings = String::new();

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                match update.result {
                    Ok(conversation) => {
                        for message in unseen(&shown, &conversation.messages) {
                            println!("{}", format_message(message));
                        }
                        let warnings = render_warnings(&conversation);
                        if warnings != last_warnings {
                            eprint!("{warnings}");
                            last_warnings = warnings;
                        }
                        shown = conversation.messages;
                    }
                    Err(e) => eprintln!("poll of {key} failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping watch");
                break;
            }
        }
    }

    poller.shutdown().await;
    Ok(())
}

/// Messages of `current` not already in `shown`, counting duplicates.
fn unseen<'a>(shown: &[Message], current: &'a [Message]) -> Vec<&'a Message> {
    let mut remaining: Vec<&Message> = shown.iter().collect();
    current
        .iter()
        .filter(|message| match remaining.iter().position(|seen| seen == message) {
            Some(index) => {
                remaining.swap_remove(index);
                false
            }
            None => true,
        })
        .collect()
}
