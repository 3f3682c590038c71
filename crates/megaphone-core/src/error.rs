//! Error types shared by every Megaphone crate.

use thiserror::Error;

/// A line read from the channel could not be turned into a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The line is not valid JSON.
    #[error("malformed chunk: {0}")]
    Json(String),

    /// The line is JSON but not an object.
    #[error("chunk is not a JSON object")]
    NotAnObject,

    /// A required wire field is absent or has the wrong type.
    #[error("chunk is missing required field `{0}`")]
    MissingField(&'static str),

    /// The chunk body does not match the type the subscriber asked for.
    #[error("chunk body does not match the expected type: {0}")]
    Body(String),
}

/// Errors raised while reading from the channel transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Request failed or the byte stream broke mid-read.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The server answered with a non-success status.
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },
}

/// A channel-wide failure, as seen by every stream on that channel.
///
/// Cloneable so that one failure can be delivered to every sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Errors returned to a caller opening or configuring streams.
#[derive(Debug, Error)]
pub enum MegaphoneError {
    /// Invalid construction parameters.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The caller-supplied factory failed. Never affects other streams.
    #[error("stream factory failed: {0}")]
    Factory(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// The stream id is already registered on this poller.
    #[error("stream `{stream_id}` is already registered")]
    DuplicateStream { stream_id: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl From<ChannelError> for MegaphoneError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Transport(e) => Self::Transport(e),
            ChannelError::Decode(e) => Self::Decode(e),
        }
    }
}

impl TransportError {
    /// Returns `true` if the server explicitly rejected the read
    /// (as opposed to the connection breaking).
    pub fn is_status(&self) -> bool {
        matches!(self, Self::Status { .. })
    }
}

impl MegaphoneError {
    /// Returns `true` if this error ended a whole channel rather than
    /// a single `open_stream` call.
    pub fn is_channel_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Decode(_))
    }
}
