//! megaphone-core — foundation types for Megaphone channel clients.
//!
//! # Overview
//!
//! A Megaphone channel is a long-lived HTTP read that carries
//! newline-delimited JSON chunks for many logical streams at once.
//! The core crate defines:
//!
//! - [`Chunk`] / [`ChannelAddress`] — wire and addressing types
//! - [`LineSplitter`] / [`decode_line`] — turning raw reads into chunks
//! - [`DedupRing`] — bounded memory of recently seen event ids
//! - [`ChannelTransport`] — the async trait every read transport implements
//! - [`MegaphoneError`] / [`ChannelError`] — structured error types

pub mod chunk;
pub mod dedup;
pub mod error;
pub mod transport;

pub use chunk::{decode_line, ChannelAddress, Chunk, LineSplitter};
pub use dedup::DedupRing;
pub use error::{ChannelError, DecodeError, MegaphoneError, TransportError};
pub use transport::{ByteStream, ChannelTransport};
