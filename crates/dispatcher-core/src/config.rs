//! Ambient configuration: capacities and timeouts for the three
//! bounded structures in the dispatcher core, validated once at startup
//! rather than left to surface as a deadlock later.

use std::time::Duration;

/// Typed, validated configuration for a single dispatcher instance.
///
/// Every field here has a matching CLI flag/env var wired up by the demo
/// binary's own config layer; this struct only owns the values and their
/// validation, not how they're sourced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub request_queue_capacity: usize,
    pub work_raw_capacity: usize,
    pub deferred_startup_capacity: usize,
    pub boot_poll_interval: Duration,
}

/// Configuration was invalid and the dispatcher refuses to start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be non-zero")]
    ZeroCapacity { field: &'static str },
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            request_queue_capacity: 256,
            work_raw_capacity: 64,
            deferred_startup_capacity: 256,
            boot_poll_interval: Duration::from_secs(1),
        }
    }
}

impl DispatcherConfig {
    /// Reject zero-capacity configurations up front: a zero-capacity
    /// bounded channel would make every enqueue fail immediately, which is
    /// never a useful runtime state and should be caught at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "request_queue_capacity",
            });
        }
        if self.work_raw_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "work_raw_capacity",
            });
        }
        if self.deferred_startup_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "deferred_startup_capacity",
            });
        }
        Ok(())
    }
}
