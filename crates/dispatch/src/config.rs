use {
    serde::{Deserialize, Serialize},
    std::time::Duration,
};

/// Pacing and retry limits for a [`ThrottledDispatcher`](crate::ThrottledDispatcher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Minimum delay between two consecutive calls (ms).
    pub min_spacing_ms: u64,

    /// How many times [`submit_with_retries`](crate::ThrottledDispatcher::submit_with_retries)
    /// re-submits a request after a transient service error. Plain `submit`
    /// never retries.
    pub max_retries: u32,

    /// Extra delay added on top of the wait a service asks for (ms).
    pub safety_margin_ms: u64,

    /// Ceiling on consecutive throttle signals for a single request. These
    /// retries are separate from `max_retries`.
    pub max_throttle_retries: u32,
}

impl DispatchConfig {
    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.safety_margin_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_spacing_ms: 100,
            max_retries: 0,
            safety_margin_ms: 250,
            max_throttle_retries: 8,
        }
    }
}
