use {serde::Serialize, std::fmt};

use crate::error::DispatchError;

/// Identity of a submission, unique per dispatcher and increasing in
/// submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One unit of work for the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest<P> {
    /// Human-given destination, resolved before dispatch.
    pub destination: String,
    pub payload: P,
    /// Platform message id this call replies to, if any.
    pub reply_to: Option<String>,
}

impl<P> CallRequest<P> {
    pub fn new(destination: impl Into<String>, payload: P) -> Self {
        Self {
            destination: destination.into(),
            payload,
            reply_to: None,
        }
    }

    #[must_use]
    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// Outcome of one submitted [`CallRequest`].
#[derive(Debug)]
pub struct DispatchResult<T> {
    pub request_id: RequestId,
    pub destination: String,
    /// Number of times the underlying primitive was called for this
    /// request, throttle retries included.
    pub calls: u32,
    pub outcome: Result<T, DispatchError>,
}

impl<T> DispatchResult<T> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&DispatchError> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, DispatchError> {
        self.outcome
    }
}
