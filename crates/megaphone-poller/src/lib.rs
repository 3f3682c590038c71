//! megaphone-poller — demultiplex one Megaphone channel into many streams.
//!
//! # Features
//! - One long-lived read per channel, reopened after a clean end of stream
//! - Bounded dedup of retransmitted event ids
//! - Per-stream completion predicates (unbounded and one-shot variants)
//! - Cancellable subscriptions exposed as `futures::Stream`
//! - Channel-wide error propagation to every open subscription
//!
//! ```text
//! ChannelTransport::read(consumer)
//!       │ bytes
//!       ▼
//! LineSplitter → decode_line → DedupRing
//!       │ Chunk
//!       ▼
//! StreamRegistry::dispatch ──► Subscription (one per open_stream call)
//! ```

pub mod config;
pub mod poller;
pub mod registry;
pub mod subscription;

pub use config::{DecodeErrorPolicy, PollerConfig};
pub use poller::{ChannelGrant, MegaphonePoller, PollerMetrics, PollerState};
pub use registry::{Dispatch, StreamRegistry};
pub use subscription::{CancelHandle, Subscription};
