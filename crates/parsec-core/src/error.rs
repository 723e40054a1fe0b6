//! Framework error taxonomy with stable numeric codes.

use thiserror::Error;

use parsec_proto::ProtoError;

/// Boundary separating framework codes from business codes when one wire
/// field must carry both domains. Kept at the legacy value for
/// bit-compatibility with existing peers.
pub const BUSINESS_ERROR_BOUNDARY: i32 = 1000;

/// Errors surfaced by the dispatch pipeline.
///
/// Three domains are kept distinguishable: **framework** errors raised by
/// this process, **business** errors reported by a handler, and
/// **callee-framework** errors raised by a downstream service's framework
/// and surfaced transparently so proxies can decide whether to retry or
/// pass through.
#[derive(Error, Debug)]
pub enum FrameworkError {
    /// Envelope or frame decode failure.
    #[error("decode failure: {0}")]
    Decode(String),

    /// Envelope or frame encode failure.
    #[error("encode failure: {0}")]
    Encode(String),

    /// No service registered for the callee name.
    #[error("service not found: {0}")]
    NoService(String),

    /// Service exists but the method does not.
    #[error("method not found: {0}")]
    NoFunc(String),

    /// Call exceeded its deadline.
    #[error("request timeout")]
    Timeout,

    /// Server refused the call under load.
    #[error("server overloaded")]
    Overload,

    /// Handler panicked or another internal invariant broke.
    #[error("system error: {0}")]
    System(String),

    /// Caller canceled the in-flight call.
    #[error("request canceled")]
    Canceled,

    /// Could not establish a connection to the peer.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Selector could not resolve the service to a node.
    #[error("route error: {0}")]
    Route(String),

    /// Generic network failure during an established exchange.
    #[error("network error: {0}")]
    Network(String),

    /// Connection pool at max active connections with wait disabled.
    #[error("connection pool limit reached")]
    PoolLimit,

    /// Connection pool was shut down.
    #[error("connection pool closed")]
    PoolClosed,

    /// Application-level failure reported by a handler.
    #[error("business error {code}: {msg}")]
    Business { code: i32, msg: String },

    /// A downstream service's framework error, passed through.
    #[error("callee framework error {code}: {msg}")]
    CalleeFramework { code: i32, msg: String },
}

impl FrameworkError {
    /// Stable numeric code carried on the wire.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Decode(_) => 1,
            Self::Encode(_) => 2,
            Self::NoService(_) => 11,
            Self::NoFunc(_) => 12,
            Self::Timeout => 21,
            Self::Overload => 22,
            Self::System(_) => 31,
            Self::Canceled => 102,
            Self::ConnectFailed(_) => 111,
            Self::Route(_) => 131,
            Self::Network(_) => 141,
            Self::PoolLimit => 142,
            Self::PoolClosed => 143,
            Self::Business { code, .. } | Self::CalleeFramework { code, .. } => *code,
        }
    }

    /// True for failures a generic retry layer may safely retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ConnectFailed(_)
                | Self::Network(_)
                | Self::Overload
                | Self::PoolLimit
        )
    }

    /// True when the error originated in a handler, not the framework.
    #[must_use]
    pub const fn is_business(&self) -> bool {
        matches!(self, Self::Business { .. })
    }

    /// Maps nonzero response ret codes back into a typed error.
    ///
    /// `ret` carries the callee's framework code; `func_ret` carries the
    /// business code. For protocols that multiplex both domains inside
    /// `func_ret`, values below [`BUSINESS_ERROR_BOUNDARY`] are treated as
    /// callee-framework errors.
    #[must_use]
    pub fn from_ret(ret: i32, func_ret: i32, msg: &str) -> Option<Self> {
        if ret != 0 {
            return Some(Self::CalleeFramework {
                code: ret,
                msg: msg.to_owned(),
            });
        }
        if func_ret != 0 {
            if func_ret < BUSINESS_ERROR_BOUNDARY {
                return Some(Self::CalleeFramework {
                    code: func_ret,
                    msg: msg.to_owned(),
                });
            }
            return Some(Self::Business {
                code: func_ret,
                msg: msg.to_owned(),
            });
        }
        None
    }

    /// Splits an error into the response envelope's (ret, func_ret, msg)
    /// triple: framework errors use `ret`, business errors use `func_ret`.
    #[must_use]
    pub fn to_ret(&self) -> (i32, i32, String) {
        match self {
            Self::Business { code, msg } => (0, *code, msg.clone()),
            other => (other.code(), 0, other.to_string()),
        }
    }
}

impl From<ProtoError> for FrameworkError {
    fn from(err: ProtoError) -> Self {
        match err {
            ProtoError::SerializerNotRegistered(_)
            | ProtoError::CompressorNotRegistered(_)
            | ProtoError::Serialisation(_)
            | ProtoError::Compression(_)
            | ProtoError::FieldTooLong { .. } => Self::Encode(err.to_string()),
            other => Self::Decode(other.to_string()),
        }
    }
}
