//! Streaming delivery: one producer task per call feeding a hand-off channel
//!
//! The channel has capacity 1, so the producer cannot read further from the
//! backend until the consumer has taken the previous chunk. Once the token is
//! cancelled the producer stops forwarding, chunks that were already handed off
//! are dropped, and the consumer receives one `AgentFailed` "request cancelled"
//! chunk before the end of the stream.

use futures_core::Stream;
use futures_util::StreamExt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{BoxError, ErrorKind, LlmError};

use super::types::ChatChunk;

const HANDOFF_CAPACITY: usize = 1;

/// Consumer side of a streamed completion
///
/// Finite and non-restartable. Dropping it abandons the stream and the
/// producer exits, whether it is waiting on the backend or on a hand-off.
#[derive(Debug)]
pub struct ChatStream {
    rx: mpsc::Receiver<ChatChunk>,
    cancel: CancellationToken,
    ended: bool,
}

impl ChatStream {
    /// Receive the next chunk, or `None` once the stream has ended
    pub async fn recv(&mut self) -> Option<ChatChunk> {
        if self.ended {
            return None;
        }
        if !self.cancel.is_cancelled() {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                chunk = self.rx.recv() => Some(chunk),
            };
            if let Some(chunk) = received {
                return self.settle(chunk);
            }
        }
        self.cancelled_chunk()
    }

    /// Drain the stream into a single string, stopping at the first error chunk
    pub async fn collect_text(mut self) -> Result<String, LlmError> {
        let mut text = String::new();
        while let Some(chunk) = self.recv().await {
            if let Some(err) = chunk.error {
                return Err(err);
            }
            text.push_str(&chunk.content);
        }
        Ok(text)
    }

    fn settle(&mut self, chunk: Option<ChatChunk>) -> Option<ChatChunk> {
        match chunk {
            Some(chunk) => {
                self.ended = chunk.is_error();
                Some(chunk)
            }
            // the producer hangs up when it sees the token
            None if self.cancel.is_cancelled() => self.cancelled_chunk(),
            None => {
                self.ended = true;
                None
            }
        }
    }

    fn cancelled_chunk(&mut self) -> Option<ChatChunk> {
        self.rx.close();
        if self.ended {
            return None;
        }
        self.ended = true;
        Some(ChatChunk::failed(LlmError::new(
            ErrorKind::AgentFailed,
            "request cancelled",
        )))
    }
}

impl Stream for ChatStream {
    type Item = ChatChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ChatChunk>> {
        let this = self.get_mut();
        if this.ended {
            return Poll::Ready(None);
        }
        if this.cancel.is_cancelled() {
            return Poll::Ready(this.cancelled_chunk());
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(chunk) => Poll::Ready(this.settle(chunk)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Spawn the producer for one streamed call
///
/// `deltas` yields text fragments read from the backend. Empty fragments are
/// skipped. The first error is delivered as a final chunk, wrapped as
/// `AgentFailed` with `provider` in the message. The sender is owned by the
/// task, so the channel closes exactly once whichever way the task exits.
pub(crate) fn spawn_producer<S>(provider: &str, cancel: &CancellationToken, deltas: S) -> ChatStream
where
    S: Stream<Item = Result<String, BoxError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
    let provider = provider.to_string();
    let token = cancel.clone();

    tokio::spawn(async move {
        let mut deltas = std::pin::pin!(deltas);
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("{} stream cancelled", provider);
                    return;
                }
                next = deltas.next() => next,
                _ = tx.closed() => {
                    debug!("{} stream abandoned by consumer", provider);
                    return;
                }
            };

            let chunk = match next {
                None => return,
                Some(Ok(text)) if text.is_empty() => continue,
                Some(Ok(text)) => ChatChunk::text(text),
                Some(Err(err)) => ChatChunk::failed(LlmError::wrap(
                    err,
                    ErrorKind::AgentFailed,
                    format!("{} stream interrupted", provider),
                )),
            };
            let terminal = chunk.is_error();

            let delivered = tokio::select! {
                biased;
                _ = token.cancelled() => false,
                sent = tx.send(chunk) => sent.is_ok(),
            };
            if !delivered || terminal {
                return;
            }
        }
    });

    ChatStream {
        rx,
        cancel: cancel.clone(),
        ended: false,
    }
}
