//! Periodic re-assembly of the active conversation.
//!
//! At most one key is polled at a time. Each activation spawns a task that
//! assembles the key immediately and then once per interval, sending every
//! result over its own channel. Switching keys, calling
//! [`Poller::deactivate`] or dropping the [`Poller`] cancels the task: any
//! assembly in progress is abandoned and its result never delivered. The
//! task also stops on its own once the receiver is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use anchorline_shared::{ConversationKey, Result};

use crate::assembler::{Conversation, ConversationAssembler};

/// Results waiting for the consumer. Small on purpose: a slow consumer
/// holds back the next poll rather than building a backlog.
const UPDATE_BUFFER: usize = 1;

#[derive(Debug)]
pub struct PollUpdate {
    pub key: ConversationKey,
    pub result: Result<Conversation>,
}

struct ActivePoll {
    key: ConversationKey,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Poller {
    assembler: Arc<ConversationAssembler>,
    interval: Duration,
    active: Option<ActivePoll>,
}

impl Poller {
    pub fn new(assembler: Arc<ConversationAssembler>, interval: Duration) -> Self {
        Self {
            assembler,
            interval,
            active: None,
        }
    }

    /// Start polling `key`, replacing whatever was active.
    pub fn activate(&mut self, key: ConversationKey) -> mpsc::Receiver<PollUpdate> {
        self.deactivate();

        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
        let token = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.assembler),
            key.clone(),
            self.interval,
            token.clone(),
            tx,
        ));

        info!(key = %key, interval_ms = self.interval.as_millis() as u64, "Polling started");
        self.active = Some(ActivePoll { key, token, handle });
        rx
    }

    pub fn deactivate(&mut self) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
            debug!(key = %active.key, "Polling cancelled");
        }
    }

    /// Cancel the active poll and wait for its task to exit.
    pub async fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
            if let Err(e) = active.handle.await {
                warn!(key = %active.key, error = %e, "Poll task ended abnormally");
            }
        }
    }

    pub fn active_key(&self) -> Option<&ConversationKey> {
        self.active.as_ref().map(|a| &a.key)
    }

    /// Whether the active task is still alive. False once the consumer has
    /// detached and the task noticed.
    pub fn is_running(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.handle.is_finished())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.deactivate();
    }
}

async fn poll_loop(
    assembler: Arc<ConversationAssembler>,
    key: ConversationKey,
    interval: Duration,
    token: CancellationToken,
    tx: mpsc::Sender<PollUpdate>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = assembler.assemble(&key) => result,
        };

        if let Err(e) = &result {
            warn!(key = %key, error = %e, "Poll failed");
        }

        let update = PollUpdate {
            key: key.clone(),
            result,
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            sent = tx.send(update) => {
                if sent.is_err() {
                    debug!(key = %key, "Consumer detached");
                    break;
                }
            }
        }
    }

    debug!(key = %key, "Poll task stopped");
}
