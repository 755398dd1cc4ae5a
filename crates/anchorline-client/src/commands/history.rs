//! Print a conversation once.

use chrono::{DateTime, Utc};

use anchorline_shared::Message;

use super::Target;
use crate::assembler::Conversation;
use crate::state::ClientState;

pub async fn history(state: &ClientState, target: &Target) -> anyhow::Result<()> {
    let key = target.resolve(state.config.signer.as_ref())?;
    let conversation = state.assembler.assemble(&key).await?;
    print!("{}", render_conversation(&conversation));
    Ok(())
}

pub fn render_conversation(conversation: &Conversation) -> String {
    let mut out = String::new();
    for message in &conversation.messages {
        out.push_str(&format_message(message));
        out.push('\n');
    }
    if conversation.messages.is_empty() {
        out.push_str(&format!("No messages in {}\n", conversation.key));
    }
    out.push_str(&render_warnings(conversation));
    out
}

pub fn render_warnings(conversation: &Conversation) -> String {
    let mut out = String::new();
    let failed = conversation.failed_anchor_count();
    if failed > 0 {
        out.push_str(&format!(
            "warning: {failed} of {} anchors could not be loaded; history is incomplete\n",
            conversation.anchor_count
        ));
    }
    for warning in &conversation.warnings {
        out.push_str(&format!("  - {warning}\n"));
    }
    out
}

pub fn format_message(message: &Message) -> String {
    let time = i64::try_from(message.timestamp_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "????-??-?? ??:??:??".into());
    format!("[{time}] {}: {}", message.sender.short(), message.content)
}
