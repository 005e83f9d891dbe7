use {
    serde::Serialize,
    std::{fmt, time::Duration},
    thiserror::Error,
};

use crate::request::RequestId;

/// Failure reported by a [`CallPrimitive`](crate::CallPrimitive) for one call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The service rejected the call and asked to wait before trying again.
    #[error("rate limited, retry after {}s", .retry_after.as_secs_f64())]
    Throttled { retry_after: Duration },

    /// Network failure or a 5xx-class service error.
    #[error("{0}")]
    Transient(String),

    /// Invalid payload, permission denied, unknown chat and the like.
    #[error("{0}")]
    Permanent(String),
}

impl CallError {
    #[must_use]
    pub fn throttled(retry_after: Duration) -> Self {
        Self::Throttled { retry_after }
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }
}

/// Failure to map a human-given destination to a concrete target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no matching destination")]
    NotFound,

    #[error("lookup failed: {0}")]
    Lookup(String),

    /// The lookup itself was rate limited by the service.
    #[error("lookup rate limited, retry after {}s", .retry_after.as_secs_f64())]
    Throttled { retry_after: Duration },
}

/// Terminal failure of one submitted request.
///
/// Every variant carries the identity of the failing request so a caller
/// can report exactly which submission failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("request {request_id}: cannot resolve destination '{destination}': {source}")]
    Resolution {
        request_id: RequestId,
        destination: String,
        #[source]
        source: ResolveError,
    },

    #[error("request {request_id} to '{destination}': transient service error: {message}")]
    Transient {
        request_id: RequestId,
        destination: String,
        message: String,
    },

    #[error("request {request_id} to '{destination}': {message}")]
    Permanent {
        request_id: RequestId,
        destination: String,
        message: String,
    },

    #[error(
        "request {request_id} to '{destination}': still rate limited after {throttle_retries} waits (last retry after {}s)",
        .retry_after.as_secs_f64()
    )]
    ThrottleExhausted {
        request_id: RequestId,
        destination: String,
        throttle_retries: u32,
        retry_after: Duration,
    },

    #[error("request {request_id} to '{destination}': cancelled before dispatch")]
    Cancelled {
        request_id: RequestId,
        destination: String,
    },
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Resolution { .. } => ErrorKind::Resolution,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Permanent { .. } => ErrorKind::Permanent,
            Self::ThrottleExhausted { .. } => ErrorKind::ThrottleExhausted,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Resolution { request_id, .. }
            | Self::Transient { request_id, .. }
            | Self::Permanent { request_id, .. }
            | Self::ThrottleExhausted { request_id, .. }
            | Self::Cancelled { request_id, .. } => *request_id,
        }
    }

    pub fn destination(&self) -> &str {
        match self {
            Self::Resolution { destination, .. }
            | Self::Transient { destination, .. }
            | Self::Permanent { destination, .. }
            | Self::ThrottleExhausted { destination, .. }
            | Self::Cancelled { destination, .. } => destination,
        }
    }

    /// Whether a caller-directed retry of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::ThrottleExhausted { .. })
    }
}

/// Coarse classification of a [`DispatchError`], suitable for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Resolution,
    Transient,
    Permanent,
    ThrottleExhausted,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolution => "resolution",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::ThrottleExhausted => "throttle_exhausted",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_error_mentions_destination_and_id() {
        let err = DispatchError::Resolution {
            request_id: RequestId(7),
            destination: "nobody".into(),
            source: ResolveError::NotFound,
        };
        let text = err.to_string();
        assert!(text.contains("#7"), "{text}");
        assert!(text.contains("nobody"), "{text}");
        assert_eq!(err.kind(), ErrorKind::Resolution);
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_is_retryable_permanent_is_not() {
        let transient = DispatchError::Transient {
            request_id: RequestId(1),
            destination: "a".into(),
            message: "timeout".into(),
        };
        let permanent = DispatchError::Permanent {
            request_id: RequestId(2),
            destination: "b".into(),
            message: "forbidden".into(),
        };
        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
        assert_eq!(permanent.request_id(), RequestId(2));
        assert_eq!(permanent.destination(), "b");
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ThrottleExhausted).unwrap();
        assert_eq!(json, r#""throttle_exhausted""#);
        assert_eq!(ErrorKind::Resolution.to_string(), "resolution");
    }
}
