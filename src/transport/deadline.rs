//! Caller-side deadlines, built on cancellation.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio::time::Sleep;

use super::event::{CallError, StatusCode, TransportEvent};
use super::source::Subscription;

pin_project! {
    /// A [`Subscription`] that is cancelled when its deadline passes.
    ///
    /// On expiry the underlying call is cancelled and a terminal
    /// `Error(DEADLINE_EXCEEDED)` is yielded in place of the events the
    /// call would have produced.
    pub struct Deadline<T> {
        subscription: Subscription<T>,
        #[pin]
        sleep: Sleep,
        done: bool,
    }
}

impl<T> Deadline<T> {
    pub(crate) fn new(subscription: Subscription<T>, timeout: Duration) -> Self {
        Self {
            subscription,
            sleep: tokio::time::sleep(timeout),
            done: false,
        }
    }

    /// Cancel the call now.
    pub fn cancel(&mut self) {
        self.done = true;
        self.subscription.cancel();
    }
}

impl<T> Stream for Deadline<T> {
    type Item = TransportEvent<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        match this.subscription.poll_next_unpin(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    *this.done = true;
                }
                return Poll::Ready(Some(event));
            }
            Poll::Ready(None) => {
                *this.done = true;
                return Poll::Ready(None);
            }
            Poll::Pending => {}
        }

        if this.sleep.poll(cx).is_ready() {
            *this.done = true;
            this.subscription.cancel();
            tracing::debug!(path = %this.subscription.label().path, "call deadline exceeded");
            return Poll::Ready(Some(TransportEvent::Error(CallError::new(
                StatusCode::DeadlineExceeded,
                "deadline exceeded",
            ))));
        }

        Poll::Pending
    }
}
