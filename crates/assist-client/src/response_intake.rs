//! Turns a gateway response into an ordered chunk subscription.

use std::fmt::Display;
use std::future::Future;

use assist_core::CancellationHandle;
use assist_protocol::{
    ChunkReassembler, ConversationSnapshot, FrameConvention, StreamChunk, STREAM_FRAMING_HEADER,
    STREAM_HEADER,
};
use futures_util::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use serde_json::Value;

use crate::subscription::IntakePublisher;
use crate::{ChunkSubscription, StreamTermination};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How the response body is delivered.
pub enum DeliveryMode {
    Streaming,
    Text,
}

/// Reads the streaming flag header. Any non-empty value other than `false`
/// or `0` selects streaming.
pub fn delivery_mode_from_headers(headers: &HeaderMap) -> DeliveryMode {
    let flag = headers
        .get(STREAM_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();
    if flag.is_empty() || flag == "0" || flag.eq_ignore_ascii_case("false") {
        DeliveryMode::Text
    } else {
        DeliveryMode::Streaming
    }
}

/// Reads the frame convention advertised by the producer, if any.
pub fn framing_from_headers(headers: &HeaderMap) -> Option<FrameConvention> {
    headers
        .get(STREAM_FRAMING_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<FrameConvention>().ok())
}

enum ReadOutcome<T> {
    Aborted,
    Next(T),
}

#[derive(Debug, Clone, Copy, Default)]
/// Drives one response to completion exactly once.
///
/// All `consume*` methods spawn the read loop on the current Tokio runtime and
/// return immediately; chunks are buffered until the subscriber reads them.
pub struct ResponseIntake {
    convention: FrameConvention,
}

impl ResponseIntake {
    pub fn new(convention: FrameConvention) -> Self {
        Self { convention }
    }

    /// Convention used when the producer does not advertise one.
    pub fn convention(&self) -> FrameConvention {
        self.convention
    }

    pub fn consume(
        &self,
        response: reqwest::Response,
        abort: CancellationHandle,
    ) -> ChunkSubscription {
        let headers = response.headers();
        match delivery_mode_from_headers(headers) {
            DeliveryMode::Streaming => {
                let convention = framing_from_headers(headers).unwrap_or(self.convention);
                tracing::debug!(
                    status = response.status().as_u16(),
                    framing = convention.as_str(),
                    "consuming streamed response"
                );
                self.consume_stream_with(response.bytes_stream(), convention, abort)
            }
            DeliveryMode::Text => {
                tracing::debug!(
                    status = response.status().as_u16(),
                    "consuming text response"
                );
                self.consume_text(async move { response.json::<Value>().await }, abort)
            }
        }
    }

    /// Streams raw body reads through the reassembler using the default convention.
    pub fn consume_stream<S, B, E>(&self, body: S, abort: CancellationHandle) -> ChunkSubscription
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.consume_stream_with(body, self.convention, abort)
    }

    pub fn consume_stream_with<S, B, E>(
        &self,
        body: S,
        convention: FrameConvention,
        abort: CancellationHandle,
    ) -> ChunkSubscription
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (publisher, subscription) =
            IntakePublisher::channel(DeliveryMode::Streaming, abort.clone());
        tokio::spawn(run_streaming(body, convention, abort, publisher));
        subscription
    }

    /// Awaits a whole JSON body and publishes it as one `metadata` chunk.
    pub fn consume_text<F, E>(&self, body: F, abort: CancellationHandle) -> ChunkSubscription
    where
        F: Future<Output = Result<Value, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (publisher, subscription) = IntakePublisher::channel(DeliveryMode::Text, abort.clone());
        tokio::spawn(run_text(body, abort, publisher));
        subscription
    }
}

async fn run_streaming<S, B, E>(
    body: S,
    convention: FrameConvention,
    abort: CancellationHandle,
    publisher: IntakePublisher,
) where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let mut body = Box::pin(body);
    let mut reassembler = ChunkReassembler::new(convention);
    loop {
        let outcome = tokio::select! {
            biased;
            _ = abort.cancelled() => ReadOutcome::Aborted,
            next = body.next() => ReadOutcome::Next(next),
        };
        match outcome {
            ReadOutcome::Aborted => {
                tracing::debug!(
                    buffered_bytes = reassembler.buffered_len(),
                    "stream intake aborted"
                );
                publisher.terminate(StreamTermination::Aborted);
                return;
            }
            ReadOutcome::Next(Some(Ok(bytes))) => {
                for chunk in reassembler.push(bytes.as_ref()) {
                    if !publisher.publish(chunk) {
                        tracing::debug!("stream subscriber went away; stopping reads");
                        return;
                    }
                }
            }
            ReadOutcome::Next(Some(Err(error))) => {
                tracing::warn!(%error, "stream transport read failed");
                publisher.publish(StreamChunk::error(format!(
                    "stream transport failed: {error}"
                )));
                publisher.terminate(StreamTermination::Failed);
                return;
            }
            ReadOutcome::Next(None) => {
                if let Some(chunk) = reassembler.finish() {
                    publisher.publish(chunk);
                }
                publisher.terminate(StreamTermination::Completed);
                return;
            }
        }
    }
}

async fn run_text<F, E>(body: F, abort: CancellationHandle, publisher: IntakePublisher)
where
    F: Future<Output = Result<Value, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let outcome = tokio::select! {
        biased;
        _ = abort.cancelled() => ReadOutcome::Aborted,
        body = body => ReadOutcome::Next(body),
    };
    match outcome {
        ReadOutcome::Aborted => publisher.terminate(StreamTermination::Aborted),
        ReadOutcome::Next(Ok(value)) => {
            publisher.publish(StreamChunk::Metadata(
                ConversationSnapshot::from_response_body(value),
            ));
            // Queued behind the metadata chunk, so it is always observed second.
            publisher.terminate(StreamTermination::Completed);
        }
        ReadOutcome::Next(Err(error)) => {
            tracing::warn!(%error, "failed to read text response body");
            publisher.publish(StreamChunk::error(format!(
                "failed to read response body: {error}"
            )));
            publisher.terminate(StreamTermination::Failed);
        }
    }
}
