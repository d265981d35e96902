//! Wall-clock limits for executions

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::DEFAULT_TIMEOUT_SECS;

/// Timeout policy applied to every execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Used when a request carries no timeout
    pub default_timeout: Duration,

    /// Upper bound for any requested timeout
    pub max_timeout: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_timeout: Duration::from_secs(600),
        }
    }
}

impl ResourceLimits {
    pub fn new(default_timeout: Duration, max_timeout: Duration) -> Self {
        Self {
            default_timeout: default_timeout.min(max_timeout),
            max_timeout,
        }
    }

    /// Effective timeout for a request, clamped to `[1s, max_timeout]`
    pub fn resolve(&self, requested_secs: Option<u64>) -> Duration {
        let requested = requested_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        requested.clamp(Duration::from_secs(1), self.max_timeout.max(Duration::from_secs(1)))
    }
}
