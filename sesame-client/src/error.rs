use sesame_types::WireError;
use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the playback and capture pipelines.
///
/// Malformed wire packets never reach this type: they are dropped at the
/// adapter with a counter bump. Decoder queue overflow is likewise handled
/// locally (flush plus a keyframe request) and only reported through the
/// overflow callback.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("decoder rejected configuration: {0}")]
    ConfigureFailed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request {id} timed out")]
    RequestTimeout { id: u64 },

    #[error("timed out waiting for the first decoded frames: {0}")]
    BufferReadyTimeout(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("player is in state {0} and cannot accept the operation")]
    InvalidState(&'static str),

    #[error(transparent)]
    Wire(#[from] WireError),
}
