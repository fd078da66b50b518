//! Single-consumer channel between the intake loop and its subscriber.
//!
//! Every signal is queued, so a subscriber that starts reading late still sees
//! every chunk that was published before it, followed by exactly one terminal
//! signal.

use assist_core::CancellationHandle;
use assist_protocol::StreamChunk;
use tokio::sync::mpsc;

use crate::DeliveryMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How a delivery ended.
pub enum StreamTermination {
    Completed,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq)]
/// One item observed by a subscriber.
pub enum IntakeSignal {
    Chunk(StreamChunk),
    Terminated(StreamTermination),
}

/// Consumer side of one response delivery.
#[derive(Debug)]
pub struct ChunkSubscription {
    mode: DeliveryMode,
    receiver: mpsc::UnboundedReceiver<IntakeSignal>,
    abort: CancellationHandle,
    terminated: bool,
}

impl ChunkSubscription {
    pub fn delivery_mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Returns the next signal, or `None` once the terminal signal was delivered.
    ///
    /// After the abort handle fires no further chunks are delivered, even if
    /// some were already queued; the next call yields `Terminated(Aborted)`.
    pub async fn next(&mut self) -> Option<IntakeSignal> {
        if self.terminated {
            return None;
        }
        let signal = if self.abort.is_cancelled() {
            IntakeSignal::Terminated(StreamTermination::Aborted)
        } else {
            tokio::select! {
                biased;
                _ = self.abort.cancelled() => IntakeSignal::Terminated(StreamTermination::Aborted),
                received = self.receiver.recv() => received
                    .unwrap_or(IntakeSignal::Terminated(StreamTermination::Failed)),
            }
        };
        if matches!(signal, IntakeSignal::Terminated(_)) {
            self.terminated = true;
            self.receiver.close();
        }
        Some(signal)
    }

    /// Drains the subscription, returning every chunk and the terminal signal.
    pub async fn collect(mut self) -> (Vec<StreamChunk>, StreamTermination) {
        let mut chunks = Vec::new();
        while let Some(signal) = self.next().await {
            match signal {
                IntakeSignal::Chunk(chunk) => chunks.push(chunk),
                IntakeSignal::Terminated(termination) => return (chunks, termination),
            }
        }
        (chunks, StreamTermination::Failed)
    }
}

/// Producer side. Terminating consumes the publisher, so at most one terminal
/// signal can be sent; dropping it without terminating reads as `Failed`.
#[derive(Debug)]
pub(crate) struct IntakePublisher {
    sender: mpsc::UnboundedSender<IntakeSignal>,
}

impl IntakePublisher {
    pub(crate) fn channel(
        mode: DeliveryMode,
        abort: CancellationHandle,
    ) -> (IntakePublisher, ChunkSubscription) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            IntakePublisher { sender },
            ChunkSubscription {
                mode,
                receiver,
                abort,
                terminated: false,
            },
        )
    }

    /// Queues one chunk; returns false once the subscriber has gone away.
    pub(crate) fn publish(&self, chunk: StreamChunk) -> bool {
        self.sender.send(IntakeSignal::Chunk(chunk)).is_ok()
    }

    pub(crate) fn terminate(self, termination: StreamTermination) {
        let _ = self.sender.send(IntakeSignal::Terminated(termination));
    }
}
