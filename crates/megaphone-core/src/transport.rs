//! The `ChannelTransport` trait — the read side of a Megaphone channel.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::TransportError;

/// Raw bytes of one long-lived read, in arrival order.
///
/// Item boundaries carry no meaning: a line may span several items.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// A cancellable byte-stream source keyed by a consumer address.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` so the poller can drive reads from
/// a spawned Tokio task.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn ChannelTransport>`.
#[async_trait]
pub trait ChannelTransport: Send + Sync + 'static {
    /// Open one read against `consumer`.
    ///
    /// A non-success response must be returned as an error here rather than
    /// as an empty stream. Dropping the returned stream cancels the read.
    async fn read(&self, consumer: &str) -> Result<ByteStream, TransportError>;

    /// Return the transport's identifier (base URL or name).
    fn url(&self) -> &str;
}
