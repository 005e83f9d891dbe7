use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use {
    tokio::{
        sync::Mutex,
        time::{Instant, sleep_until},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::{
    config::DispatchConfig,
    error::{CallError, DispatchError, ResolveError},
    primitive::{CallPrimitive, Resolver},
    request::{CallRequest, DispatchResult, RequestId},
};

/// Earliest instant at which the next call may be issued.
///
/// Owned by one dispatcher and only mutated while its dispatch lock is held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleState {
    next_allowed: Option<Instant>,
}

impl ThrottleState {
    pub fn next_allowed(&self) -> Option<Instant> {
        self.next_allowed
    }

    /// A call finished at `now`; the next one must wait `spacing`.
    fn record_call(&mut self, now: Instant, spacing: Duration) {
        self.next_allowed = Some(now + spacing);
    }

    /// The service asked for `wait` before anything else is sent.
    fn record_throttle(&mut self, now: Instant, wait: Duration, spacing: Duration) {
        self.next_allowed = Some(now + wait.max(spacing));
    }
}

/// Issues [`CallRequest`]s to a [`CallPrimitive`] one at a time, in order.
///
/// The dispatch lock is held for the whole lifetime of a submission
/// (resolution, pacing, the call itself and any throttle backoff), so
/// concurrent submitters sharing one dispatcher are served in FIFO order
/// and never have two calls in flight. Lookups the resolver reports as
/// remote count as calls: they are paced, and a throttled lookup is waited
/// out and retried under the same ceiling as the call itself.
pub struct ThrottledDispatcher<P, R> {
    primitive: P,
    resolver: R,
    config: DispatchConfig,
    state: Mutex<ThrottleState>,
    next_id: AtomicU64,
}

/// Result of a single pass through the dispatch loop.
struct Attempt<T> {
    calls: u32,
    outcome: Result<T, DispatchError>,
}

impl<P, R> ThrottledDispatcher<P, R>
where
    P: CallPrimitive,
    R: Resolver<Target = P::Target>,
{
    pub fn new(primitive: P, resolver: R, config: DispatchConfig) -> Self {
        Self {
            primitive,
            resolver,
            config,
            state: Mutex::new(ThrottleState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn primitive(&self) -> &P {
        &self.primitive
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub async fn throttle_state(&self) -> ThrottleState {
        *self.state.lock().await
    }

    /// Dispatch one request and wait for its terminal outcome.
    ///
    /// Throttle signals are retried internally; every other failure is
    /// returned as-is without a retry.
    pub async fn submit(
        &self,
        request: CallRequest<P::Payload>,
    ) -> DispatchResult<P::Response> {
        let request_id = self.allocate_id();
        let attempt = self.dispatch(request_id, &request, None).await;
        finish(request_id, request, attempt)
    }

    /// Like [`submit`](Self::submit), but gives up with
    /// [`DispatchError::Cancelled`] if `cancel` fires while the request is
    /// still waiting to be issued. A call already handed to the service is
    /// never interrupted.
    pub async fn submit_cancellable(
        &self,
        request: CallRequest<P::Payload>,
        cancel: &CancellationToken,
    ) -> DispatchResult<P::Response> {
        let request_id = self.allocate_id();
        let attempt = self.dispatch(request_id, &request, Some(cancel)).await;
        finish(request_id, request, attempt)
    }

    /// Dispatch requests strictly in order. Results are parallel to the input.
    pub async fn submit_batch<I>(&self, requests: I) -> Vec<DispatchResult<P::Response>>
    where
        I: IntoIterator<Item = CallRequest<P::Payload>>,
    {
        let requests = requests.into_iter();
        let mut results = Vec::with_capacity(requests.size_hint().0);
        for request in requests {
            results.push(self.submit(request).await);
        }
        results
    }

    /// Caller-directed retry: re-submit after a transient service error, up
    /// to `max_retries` extra times. Every resubmission is paced like a
    /// fresh call and keeps the same request id.
    pub async fn submit_with_retries(
        &self,
        request: CallRequest<P::Payload>,
    ) -> DispatchResult<P::Response> {
        let request_id = self.allocate_id();
        let mut calls = 0;
        let mut retries = 0;

        loop {
            let attempt = self.dispatch(request_id, &request, None).await;
            calls += attempt.calls;

            let retry = matches!(attempt.outcome, Err(DispatchError::Transient { .. }))
                && retries < self.config.max_retries;
            if !retry {
                return finish(
                    request_id,
                    request,
                    Attempt {
                        calls,
                        outcome: attempt.outcome,
                    },
                );
            }

            retries += 1;
            debug!(
                %request_id,
                destination = %request.destination,
                retries,
                max_retries = self.config.max_retries,
                "re-submitting after transient failure"
            );
        }
    }

    fn allocate_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn dispatch(
        &self,
        request_id: RequestId,
        request: &CallRequest<P::Payload>,
        cancel: Option<&CancellationToken>,
    ) -> Attempt<P::Response> {
        let destination = request.destination.as_str();
        let cancelled = || Attempt {
            calls: 0,
            outcome: Err(DispatchError::Cancelled {
                request_id,
                destination: destination.to_string(),
            }),
        };

        let mut state = match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => return cancelled(),
                guard = self.state.lock() => guard,
            },
            None => self.state.lock().await,
        };

        let spacing = self.config.min_spacing();
        let remote = self.resolver.is_remote(destination);
        let mut calls = 0u32;
        let mut throttle_retries = 0u32;

        let target = loop {
            let paced = remote || throttle_retries > 0;
            if paced && !pace(state.next_allowed(), request_id, destination, cancel).await {
                debug!(%request_id, destination, "request cancelled before lookup");
                return cancelled();
            }

            let resolved = self.resolver.resolve(destination).await;
            let now = Instant::now();

            let source = match resolved {
                Ok(target) => {
                    if remote {
                        state.record_call(now, spacing);
                    }
                    break target;
                },
                Err(ResolveError::Throttled { retry_after }) => {
                    let wait = retry_after + self.config.safety_margin();
                    state.record_throttle(now, wait, spacing);

                    if throttle_retries >= self.config.max_throttle_retries {
                        warn!(
                            %request_id,
                            destination,
                            throttle_retries,
                            retry_after_ms = millis(retry_after),
                            "lookup still rate limited after retries"
                        );
                        return Attempt {
                            calls,
                            outcome: Err(DispatchError::ThrottleExhausted {
                                request_id,
                                destination: destination.to_string(),
                                throttle_retries,
                                retry_after,
                            }),
                        };
                    }

                    throttle_retries += 1;
                    warn!(
                        %request_id,
                        destination,
                        throttle_retries,
                        wait_ms = millis(wait),
                        "lookup rate limited, waiting before retry"
                    );
                    continue;
                },
                Err(source) => source,
            };

            if remote {
                state.record_call(now, spacing);
            }
            warn!(%request_id, destination, error = %source, "destination not resolved");
            return Attempt {
                calls,
                outcome: Err(DispatchError::Resolution {
                    request_id,
                    destination: destination.to_string(),
                    source,
                }),
            };
        };

        loop {
            if !pace(state.next_allowed(), request_id, destination, cancel).await {
                debug!(%request_id, destination, calls, "request cancelled while waiting");
                return Attempt { calls, ..cancelled() };
            }

            calls += 1;
            debug!(%request_id, destination, call = calls, ?target, "issuing call");
            let result = self
                .primitive
                .call(&target, &request.payload, request.reply_to.as_deref())
                .await;
            let now = Instant::now();

            let error = match result {
                Ok(response) => {
                    state.record_call(now, spacing);
                    return Attempt {
                        calls,
                        outcome: Ok(response),
                    };
                },
                Err(error) => error,
            };

            match error {
                CallError::Throttled { retry_after } => {
                    let wait = retry_after + self.config.safety_margin();
                    state.record_throttle(now, wait, spacing);

                    if throttle_retries >= self.config.max_throttle_retries {
                        warn!(
                            %request_id,
                            destination,
                            throttle_retries,
                            max_throttle_retries = self.config.max_throttle_retries,
                            retry_after_ms = millis(retry_after),
                            "rate limit persisted after retries"
                        );
                        return Attempt {
                            calls,
                            outcome: Err(DispatchError::ThrottleExhausted {
                                request_id,
                                destination: destination.to_string(),
                                throttle_retries,
                                retry_after,
                            }),
                        };
                    }

                    throttle_retries += 1;
                    warn!(
                        %request_id,
                        destination,
                        throttle_retries,
                        retry_after_ms = millis(retry_after),
                        wait_ms = millis(wait),
                        "rate limited, waiting before retry"
                    );
                },
                CallError::Transient(message) => {
                    state.record_call(now, spacing);
                    warn!(%request_id, destination, error = %message, "transient service error");
                    return Attempt {
                        calls,
                        outcome: Err(DispatchError::Transient {
                            request_id,
                            destination: destination.to_string(),
                            message,
                        }),
                    };
                },
                CallError::Permanent(message) => {
                    state.record_call(now, spacing);
                    warn!(%request_id, destination, error = %message, "call rejected");
                    return Attempt {
                        calls,
                        outcome: Err(DispatchError::Permanent {
                            request_id,
                            destination: destination.to_string(),
                            message,
                        }),
                    };
                },
            }
        }
    }
}

fn finish<P, T>(
    request_id: RequestId,
    request: CallRequest<P>,
    attempt: Attempt<T>,
) -> DispatchResult<T> {
    DispatchResult {
        request_id,
        destination: request.destination,
        calls: attempt.calls,
        outcome: attempt.outcome,
    }
}

/// Wait until the next call is allowed. Returns `false` if `cancel` fired.
async fn pace(
    next_allowed: Option<Instant>,
    request_id: RequestId,
    destination: &str,
    cancel: Option<&CancellationToken>,
) -> bool {
    let Some(deadline) = next_allowed else {
        return !cancel.is_some_and(CancellationToken::is_cancelled);
    };
    let now = Instant::now();
    if deadline > now {
        debug!(
            %request_id,
            destination,
            wait_ms = millis(deadline - now),
            "pacing before call"
        );
    }
    wait_until(deadline, cancel).await
}

/// Sleep until `deadline`. Returns `false` if `cancel` fired first.
async fn wait_until(deadline: Instant, cancel: Option<&CancellationToken>) -> bool {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            () = token.cancelled() => false,
            () = sleep_until(deadline) => true,
        },
        None => {
            sleep_until(deadline).await;
            true
        },
    }
}

/// Whole milliseconds for log fields, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
