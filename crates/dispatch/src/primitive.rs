use {async_trait::async_trait, std::fmt::Debug};

use crate::error::{CallError, ResolveError};

/// A single remote call, supplied by the service's client library.
///
/// Authentication, transport and response decoding stay inside the
/// implementation. The dispatcher only needs to know whether a call
/// succeeded, was throttled, or failed.
#[async_trait]
pub trait CallPrimitive: Send + Sync {
    /// Concrete service-level destination.
    type Target: Clone + Debug + Send + Sync;
    type Payload: Send + Sync;
    type Response: Send;

    async fn call(
        &self,
        target: &Self::Target,
        payload: &Self::Payload,
        reply_to: Option<&str>,
    ) -> Result<Self::Response, CallError>;
}

/// Maps a human-readable destination to a concrete target.
#[async_trait]
pub trait Resolver: Send + Sync {
    type Target: Clone + Debug + Send + Sync;

    /// Whether resolving `destination` needs a call to the service. Such
    /// lookups are paced and throttled like any other call.
    fn is_remote(&self, _destination: &str) -> bool {
        false
    }

    async fn resolve(&self, destination: &str) -> Result<Self::Target, ResolveError>;
}
