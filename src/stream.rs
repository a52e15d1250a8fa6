use crate::channel::OutputChannel;
use crate::models::{DisplayUpdate, OutputEvent};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Creates a connected sink/stream pair for display updates.
pub fn update_stream() -> (UpdateSink, UpdateStream) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (UpdateSink { sender }, UpdateStream { receiver })
}

#[derive(Debug, Clone)]
pub struct UpdateSink {
    sender: mpsc::UnboundedSender<DisplayUpdate>,
}

impl UpdateSink {
    /// Returns `false` once the receiving side has gone away. Producers keep
    /// draining regardless so their readers still reach EOF.
    pub fn send(&self, update: DisplayUpdate) -> bool {
        self.sender.send(update).is_ok()
    }
}

/// Ordered display updates for one task. The stream ends after its terminal update.
#[derive(Debug)]
pub struct UpdateStream {
    receiver: mpsc::UnboundedReceiver<DisplayUpdate>,
}

impl UpdateStream {
    /// A stream that yields `update` and then closes.
    pub fn single(update: DisplayUpdate) -> Self {
        let (sink, stream) = update_stream();
        sink.send(update);
        stream
    }

    pub async fn next(&mut self) -> Option<DisplayUpdate> {
        self.receiver.recv().await
    }

    pub async fn collect(mut self) -> Vec<DisplayUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = self.next().await {
            updates.push(update);
        }
        updates
    }
}

/// Anything the consumer can ask "are you still producing?".
pub trait Liveness: Send {
    fn is_alive(&mut self) -> bool;
}

impl<T: Send> Liveness for JoinHandle<T> {
    fn is_alive(&mut self) -> bool {
        !self.is_finished()
    }
}

/// Pulls events until the producer is gone and the channel is drained.
pub struct StreamConsumer<P> {
    channel: OutputChannel,
    producer: P,
    backoff: Duration,
    finished: bool,
}

impl<P: Liveness> StreamConsumer<P> {
    pub fn new(channel: OutputChannel, producer: P, backoff: Duration) -> Self {
        Self {
            channel,
            producer,
            backoff,
            finished: false,
        }
    }

    /// Next event in push order, or `None` once the task is complete.
    pub async fn next_event(&mut self) -> Option<OutputEvent> {
        if self.finished {
            return None;
        }
        loop {
            if let Some(event) = self.channel.try_pop() {
                return Some(event);
            }
            if !self.producer.is_alive() {
                // a final push may land between the pop above and the producer exiting
                if let Some(event) = self.channel.try_pop() {
                    return Some(event);
                }
                self.finished = true;
                return None;
            }
            self.channel.wait(self.backoff).await;
        }
    }

    pub fn into_producer(self) -> P {
        self.producer
    }
}

/// Grows a display buffer a few characters at a time, emitting the whole
/// buffer after each step so the reader sees continuous progress.
#[derive(Debug, Clone)]
pub struct PacedReveal {
    buffer: String,
    delay: Duration,
    chunk_chars: usize,
}

impl PacedReveal {
    pub fn new(delay: Duration, chunk_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            delay,
            chunk_chars: chunk_chars.max(1),
        }
    }

    pub async fn append(&mut self, text: &str, sink: &UpdateSink) {
        let mut chars = text.chars().peekable();
        while chars.peek().is_some() {
            let chunk: String = chars.by_ref().take(self.chunk_chars).collect();
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.buffer.push_str(&chunk);
            sink.send(DisplayUpdate::progress(self.buffer.clone()));
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }
}
