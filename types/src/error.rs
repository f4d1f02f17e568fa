use thiserror::Error;

/// Sentinel for a service error whose body carried no usable numeric code.
pub const UNKNOWN_ERROR_CODE: i64 = -1;

/// Classification of wire-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The connection could not be established.
    Connect,
    /// The envelope timeout elapsed before the exchange completed.
    Timeout,
    /// The response envelope could not be parsed into the expected shape.
    MalformedResponse,
    /// The exchange failed mid-flight (read/write error).
    Io,
}

impl TransportErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::MalformedResponse => "malformed response",
            Self::Io => "io",
        }
    }
}

/// Error taxonomy for the SDK.
///
/// The three variants map to the three ways a call can go wrong:
///
/// - [`GraphError::Usage`] - the caller misused the API (both a graph path
///   and a legacy method on one descriptor, an empty batch, a negative
///   timeout, re-executing a finished task). Always signaled synchronously
///   at the point of misuse, never delivered through a completion handler,
///   never retried.
/// - [`GraphError::Transport`] - the wire exchange itself failed
///   (connectivity, timeout, malformed envelope). Surfaced as an error
///   [`CallResult`](crate::CallResult) for every descriptor in the affected
///   batch; the exchange never partially succeeds.
/// - [`GraphError::Service`] - the exchange succeeded but the response body
///   carried the remote error shape. This is the common case for
///   business-logic failures and can arrive under an HTTP 200.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("invalid usage: {0}")]
    Usage(String),

    #[error("transport failure ({}): {message}", .kind.as_str())]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    #[error("service error {code} ({}): {message}", .error_type.as_deref().unwrap_or("unknown"))]
    Service {
        /// Remote error type, when the body carried one.
        error_type: Option<String>,
        /// Remote error code, or [`UNKNOWN_ERROR_CODE`].
        code: i64,
        /// Remote error message.
        message: String,
        /// Raw response body for diagnostics.
        body: String,
    },
}

impl GraphError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::transport(TransportErrorKind::Timeout, message)
    }

    #[must_use]
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Transport {
                kind: TransportErrorKind::Timeout,
                ..
            }
        )
    }

    #[must_use]
    pub fn is_service(&self) -> bool {
        matches!(self, Self::Service { .. })
    }

    /// Remote error code for service errors, [`UNKNOWN_ERROR_CODE`] otherwise.
    #[must_use]
    pub fn service_code(&self) -> i64 {
        match self {
            Self::Service { code, .. } => *code,
            _ => UNKNOWN_ERROR_CODE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_display_includes_type_and_code() {
        let err = GraphError::Service {
            error_type: Some("OAuthException".to_string()),
            code: 190,
            message: "token expired".to_string(),
            body: String::new(),
        };
        let text = err.to_string();
        assert!(text.contains("190"), "{text}");
        assert!(text.contains("OAuthException"), "{text}");
        assert!(text.contains("token expired"), "{text}");
    }

    #[test]
    fn timeout_classification() {
        let err = GraphError::timeout("batch timed out after 1ms");
        assert!(err.is_transport());
        assert!(err.is_timeout());
        assert!(!err.is_service());
        assert_eq!(err.service_code(), UNKNOWN_ERROR_CODE);
    }

    #[test]
    fn usage_error_is_not_transport() {
        let err = GraphError::usage("empty batch");
        assert!(err.is_usage());
        assert!(!err.is_transport());
    }
}
