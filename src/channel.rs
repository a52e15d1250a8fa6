use crate::models::OutputEvent;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct ChannelState {
    events: VecDeque<OutputEvent>,
    next_sequence: u64,
}

/// Unbounded FIFO of output events. Clones share the queue; sequence numbers
/// are assigned under its lock, so they follow push order.
#[derive(Clone, Default)]
pub struct OutputChannel {
    state: Arc<Mutex<ChannelState>>,
    notify: Arc<Notify>,
}

impl OutputChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event and returns its sequence number. Never blocks on the consumer.
    pub fn push(&self, source_name: impl Into<String>, payload: impl Into<String>) -> u64 {
        let sequence = {
            let mut state = self.lock();
            let sequence = state.next_sequence;
            state.next_sequence = state.next_sequence.saturating_add(1);
            state.events.push_back(OutputEvent {
                source_name: source_name.into(),
                payload: payload.into(),
                sequence,
            });
            sequence
        };
        self.notify.notify_one();
        sequence
    }

    pub fn try_pop(&self) -> Option<OutputEvent> {
        self.lock().events.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    /// Parks until a push happens or `backoff` elapses, whichever is first.
    ///
    /// A push that raced ahead of this call leaves a stored permit, so the
    /// wait returns immediately instead of sleeping through it.
    pub async fn wait(&self, backoff: Duration) {
        let _ = tokio::time::timeout(backoff, self.notify.notified()).await;
    }

    // A producer panicking mid-push cannot leave the deque half-written, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for OutputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputChannel")
            .field("pending", &self.len())
            .finish()
    }
}
