//! Transport error types and their framework-error classification.

use thiserror::Error;

use parsec_core::FrameworkError;
use parsec_proto::ProtoError;

/// Errors that can occur during transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// I/O error from the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not establish a connection.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The peer closed the connection mid-frame.
    #[error("connection closed mid-frame")]
    UnexpectedEof,

    /// The call exceeded its deadline.
    #[error("request timeout")]
    Timeout,

    /// The caller canceled the in-flight call.
    #[error("request canceled")]
    Canceled,

    /// The destination address could not be parsed or resolved.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Frame or envelope level protocol failure.
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),

    /// Connection pool at its active limit with wait disabled.
    #[error("connection pool limit reached")]
    PoolLimit,

    /// Connection pool was shut down.
    #[error("connection pool closed")]
    PoolClosed,
}

impl TransportError {
    /// True when the failure was a deadline expiry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

impl From<TransportError> for FrameworkError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::Timeout,
            TransportError::Canceled => Self::Canceled,
            TransportError::ConnectFailed(msg) => Self::ConnectFailed(msg),
            TransportError::PoolLimit => Self::PoolLimit,
            TransportError::PoolClosed => Self::PoolClosed,
            TransportError::InvalidAddress(msg) => Self::Route(msg),
            TransportError::UnexpectedEof => Self::Network("connection closed mid-frame".into()),
            TransportError::Proto(e) => e.into(),
            TransportError::Io(e) => match e.kind() {
                std::io::ErrorKind::TimedOut => Self::Timeout,
                std::io::ErrorKind::ConnectionRefused => Self::ConnectFailed(e.to_string()),
                _ => Self::Network(e.to_string()),
            },
        }
    }
}
