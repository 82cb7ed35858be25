//! Pull-based generation stream with explicit termination and cancellation.
//!
//! A backend obtains a `(ChunkSender, GenerationStream)` pair from [`channel`],
//! hands the stream to the caller and feeds chunks through the sender. The
//! stream side owns the state machine:
//!
//! ```text
//! Idle -> Streaming -> { Completed, Failed, Cancelled }
//! ```
//!
//! Sequence numbers are assigned by the sender, so the consumer always sees
//! strictly increasing numbers with no gaps. After `cancel()` the stream yields
//! nothing further and never reports `Completed`.

use std::time::Duration;
use tokio::sync::mpsc;

use crate::cancel::CancelHandle;
use crate::error::GenerationError;
use crate::types::GenerationChunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl GenerationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, GenerationState::Completed | GenerationState::Failed | GenerationState::Cancelled)
    }
}

#[derive(Debug)]
enum Frame {
    Chunk(GenerationChunk),
    Failed(GenerationError),
}

/// Create a connected sender/stream pair.
///
/// `inactivity` bounds the wait for each chunk; `buffer` is the number of
/// chunks the producer may run ahead of the consumer.
pub fn channel(inactivity: Duration, buffer: usize) -> (ChunkSender, GenerationStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let cancel = CancelHandle::new();
    let sender = ChunkSender { tx, next_seq: 1, cancel: cancel.clone() };
    let stream = GenerationStream { rx, cancel, state: GenerationState::Idle, inactivity, last_seq: 0 };
    (sender, stream)
}

/// Producer half, owned by the backend task.
#[derive(Debug)]
pub struct ChunkSender {
    tx: mpsc::Sender<Frame>,
    next_seq: u64,
    cancel: CancelHandle,
}

impl ChunkSender {
    /// Emit a non-final chunk. Fails with `Cancelled` once the consumer has
    /// cancelled or gone away; the producer should stop at that point.
    pub async fn send(&mut self, text: impl Into<String>) -> Result<(), GenerationError> {
        self.push(text.into(), false).await
    }

    /// Emit the terminating chunk.
    pub async fn finish(mut self, text: impl Into<String>) -> Result<(), GenerationError> {
        self.push(text.into(), true).await
    }

    /// Terminate the stream with an error.
    pub async fn fail(self, err: GenerationError) {
        if self.cancel.is_cancelled() {
            return;
        }
        let _ = self.tx.send(Frame::Failed(err)).await;
    }

    pub fn is_cancelled(&self) -> bool { self.cancel.is_cancelled() || self.tx.is_closed() }

    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle { self.cancel.clone() }

    async fn push(&mut self, text: String, is_final: bool) -> Result<(), GenerationError> {
        if self.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        let chunk = GenerationChunk { sequence_no: self.next_seq, text, is_final };
        let cancel = self.cancel.clone();
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            r = self.tx.send(Frame::Chunk(chunk)) => r.is_ok(),
        };
        if !sent {
            return Err(GenerationError::Cancelled);
        }
        self.next_seq += 1;
        Ok(())
    }
}

/// Consumer half, handed to the orchestrator.
#[derive(Debug)]
pub struct GenerationStream {
    rx: mpsc::Receiver<Frame>,
    cancel: CancelHandle,
    state: GenerationState,
    inactivity: Duration,
    last_seq: u64,
}

enum Received {
    Cancelled,
    TimedOut,
    Frame(Option<Frame>),
}

impl GenerationStream {
    pub fn state(&self) -> GenerationState { self.state }

    pub fn cancel_handle(&self) -> CancelHandle { self.cancel.clone() }

    /// Stop the stream. A no-op once the stream has reached a terminal state.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if !self.state.is_terminal() {
            self.state = GenerationState::Cancelled;
        }
        self.rx.close();
    }

    /// Next chunk in sequence order, an error that ends the stream, or `None`
    /// once the stream is terminal.
    pub async fn next_chunk(&mut self) -> Option<Result<GenerationChunk, GenerationError>> {
        if self.state.is_terminal() {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.cancel();
            return None;
        }
        self.state = GenerationState::Streaming;

        let cancel = self.cancel.clone();
        let inactivity = self.inactivity;
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => Received::Cancelled,
            r = tokio::time::timeout(inactivity, self.rx.recv()) => match r {
                Ok(frame) => Received::Frame(frame),
                Err(_) => Received::TimedOut,
            },
        };

        match received {
            Received::Cancelled => {
                self.cancel();
                None
            }
            Received::TimedOut => Some(Err(self.fail(GenerationError::Timeout(inactivity)))),
            Received::Frame(None) => {
                Some(Err(self.fail(GenerationError::Backend("stream ended before a final chunk".into()))))
            }
            Received::Frame(Some(Frame::Failed(e))) => Some(Err(self.fail(e))),
            Received::Frame(Some(Frame::Chunk(chunk))) => {
                if chunk.sequence_no <= self.last_seq {
                    let msg = format!("sequence {} after {}", chunk.sequence_no, self.last_seq);
                    return Some(Err(self.fail(GenerationError::Backend(msg))));
                }
                self.last_seq = chunk.sequence_no;
                if chunk.is_final {
                    self.state = GenerationState::Completed;
                    self.rx.close();
                }
                Some(Ok(chunk))
            }
        }
    }

    fn fail(&mut self, err: GenerationError) -> GenerationError {
        self.state = GenerationState::Failed;
        // Tell the producer to stop; the state is already terminal so this
        // does not turn into Cancelled.
        self.cancel.cancel();
        self.rx.close();
        err
    }
}
