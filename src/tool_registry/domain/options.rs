//! Per-server invocation timeout options.

use super::ToolRegistryDomainError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-call timeout in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 60_000;

/// Timeout policy applied to every tool invocation on a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationOptions {
    call_timeout_ms: u64,
    reset_timeout_on_progress: bool,
    max_total_timeout_ms: Option<u64>,
}

impl Default for InvocationOptions {
    fn default() -> Self {
        Self {
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            reset_timeout_on_progress: false,
            max_total_timeout_ms: None,
        }
    }
}

impl InvocationOptions {
    /// Creates validated invocation options.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::NonPositiveTimeout`] when either
    /// timeout is zero and
    /// [`ToolRegistryDomainError::TotalTimeoutBelowCallTimeout`] when the
    /// absolute ceiling is shorter than the per-call timeout.
    pub const fn new(
        call_timeout_ms: u64,
        reset_timeout_on_progress: bool,
        max_total_timeout_ms: Option<u64>,
    ) -> Result<Self, ToolRegistryDomainError> {
        if call_timeout_ms == 0 {
            return Err(ToolRegistryDomainError::NonPositiveTimeout { field: "timeout" });
        }

        if let Some(ceiling) = max_total_timeout_ms {
            if ceiling == 0 {
                return Err(ToolRegistryDomainError::NonPositiveTimeout {
                    field: "maxTotalTimeout",
                });
            }
            if ceiling < call_timeout_ms {
                return Err(ToolRegistryDomainError::TotalTimeoutBelowCallTimeout {
                    call_timeout_ms,
                    max_total_timeout_ms: ceiling,
                });
            }
        }

        Ok(Self {
            call_timeout_ms,
            reset_timeout_on_progress,
            max_total_timeout_ms,
        })
    }

    /// Returns the per-call timeout.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Returns the per-call timeout in milliseconds.
    #[must_use]
    pub const fn call_timeout_ms(&self) -> u64 {
        self.call_timeout_ms
    }

    /// Returns whether progress signals restart the call deadline.
    #[must_use]
    pub const fn reset_timeout_on_progress(&self) -> bool {
        self.reset_timeout_on_progress
    }

    /// Returns the absolute ceiling, if configured.
    #[must_use]
    pub const fn max_total_timeout(&self) -> Option<Duration> {
        match self.max_total_timeout_ms {
            Some(ceiling) => Some(Duration::from_millis(ceiling)),
            None => None,
        }
    }

    /// Returns the absolute ceiling in milliseconds, if configured.
    #[must_use]
    pub const fn max_total_timeout_ms(&self) -> Option<u64> {
        self.max_total_timeout_ms
    }

    /// Returns whether every field holds its default value.
    #[must_use]
    pub const fn is_default(&self) -> bool {
        self.call_timeout_ms == DEFAULT_CALL_TIMEOUT_MS
            && !self.reset_timeout_on_progress
            && self.max_total_timeout_ms.is_none()
    }

    /// Re-checks the invariants on values reconstructed from persistence.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`InvocationOptions::new`].
    pub fn validate(&self) -> Result<(), ToolRegistryDomainError> {
        Self::new(
            self.call_timeout_ms,
            self.reset_timeout_on_progress,
            self.max_total_timeout_ms,
        )
        .map(drop)
    }
}
