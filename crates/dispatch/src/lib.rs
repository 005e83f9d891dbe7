//! Throttled external-API call dispatcher.
//!
//! Issues calls to a remote service one at a time, in submission order,
//! keeping a minimum spacing between calls and honoring the service's own
//! "retry after" signals. Destinations are resolved before anything reaches
//! the underlying call primitive.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod primitive;
pub mod request;

pub use {
    config::DispatchConfig,
    dispatcher::{ThrottleState, ThrottledDispatcher},
    error::{CallError, DispatchError, ErrorKind, ResolveError},
    primitive::{CallPrimitive, Resolver},
    request::{CallRequest, DispatchResult, RequestId},
};
