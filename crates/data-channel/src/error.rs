//! Error types for the data channel.

/// Errors produced by the stream transport and receiver.
#[derive(Debug, thiserror::Error)]
pub enum DataChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid target path: {0}")]
    InvalidPath(String),

    #[error("connection timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("receiver rejected the upload")]
    Rejected,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no tokio runtime available")]
    NoRuntime,
}
