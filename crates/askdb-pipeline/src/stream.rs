//! Caller side of a streaming ask.

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use askdb_core::CancelHandle;

use crate::api::StreamEvent;

/// Events of one streaming ask, ending with a single `done` or `error`.
///
/// Cancelling (or dropping) the stream cancels the request's generation; no
/// events are yielded afterwards.
#[derive(Debug)]
pub struct AskStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancelHandle,
    finished: bool,
}

impl AskStream {
    pub(crate) fn new(rx: mpsc::Receiver<StreamEvent>, cancel: CancelHandle) -> Self {
        Self { rx, cancel, finished: false }
    }

    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.finished = true;
        self.rx.close();
    }

    pub fn cancel_handle(&self) -> CancelHandle { self.cancel.clone() }

    pub async fn next_event(&mut self) -> Option<StreamEvent> { futures::StreamExt::next(self).await }
}

impl Stream for AskStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        let this = self.get_mut();
        if this.finished || this.cancel.is_cancelled() {
            this.finished = true;
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                this.finished = event.is_terminal();
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for AskStream {
    fn drop(&mut self) { self.cancel.cancel(); }
}
