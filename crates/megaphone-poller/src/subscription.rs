//! Caller-side handle for one `open_stream` call.

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use megaphone_core::{ChannelError, Chunk};

use crate::poller::Shared;
use crate::registry::SinkId;

struct CancelInner {
    stream_ids: Vec<String>,
    sink_id: SinkId,
    poller: Weak<Shared>,
    cancelled: AtomicBool,
}

/// Detached cancellation for a [`Subscription`].
///
/// Cloneable and `Send`, so another task can stop a stream it does not own.
/// Cleanup runs exactly once no matter how many clones call `cancel`.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

impl CancelHandle {
    pub(crate) fn new(stream_ids: Vec<String>, sink_id: SinkId, poller: Weak<Shared>) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                stream_ids,
                sink_id,
                poller,
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// Remove this subscription's stream ids from the poller.
    ///
    /// Once this returns no further chunk reaches the subscription. The read
    /// loop keeps running until it notices the registry is empty.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(poller) = self.inner.poller.upgrade() {
            let removed = poller.remove_streams(&self.inner.stream_ids, self.inner.sink_id);
            tracing::debug!(
                streams = ?self.inner.stream_ids,
                removed,
                "subscription cancelled"
            );
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }
}

/// Lazily consumed, cancellable sequence of chunks for one or more stream ids.
///
/// Nothing is produced until the stream is polled. Items are `Ok` chunks in
/// arrival order, or a single `Err` when the channel fails, after which the
/// stream ends. The stream also ends once every stream id has been removed,
/// either by its completion predicate or by [`Subscription::cancel`].
///
/// Dropping the subscription cancels it.
pub struct Subscription<T = Value> {
    rx: mpsc::UnboundedReceiver<Result<Chunk<Value>, ChannelError>>,
    cancel: CancelHandle,
    _body: PhantomData<fn() -> T>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<Result<Chunk<Value>, ChannelError>>,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            rx,
            cancel,
            _body: PhantomData,
        }
    }

    /// Stream ids this subscription was registered for.
    pub fn stream_ids(&self) -> &[String] {
        &self.cancel.inner.stream_ids
    }

    /// Stop delivery. Safe to call repeatedly or after the stream ended.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl<T: DeserializeOwned> Stream for Subscription<T> {
    type Item = Result<Chunk<T>, ChannelError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                Poll::Ready(Some(chunk.parse_body().map_err(ChannelError::from)))
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("stream_ids", &self.cancel.inner.stream_ids)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
