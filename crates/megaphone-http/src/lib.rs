//! megaphone-http — streaming HTTP read transport for Megaphone channels.
//!
//! Reads `GET {base_url}/read/{consumer}` and hands the response body to the
//! poller as a byte stream. The request has no overall timeout: a channel
//! read is expected to stay open for as long as the server keeps it open.

pub mod client;

pub use client::{HttpChannelTransport, HttpTransportConfig};
