//! Error types for the control plane.
//!
//! Rate-limit denial is not an error; it is a [`Decision`](crate::rate_limit::Decision).
//! Metrics updates cannot fail and have no error type.

use std::time::Duration;
use thiserror::Error;

/// Invalid configuration values, reported by `build()`/`validate()`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Burst capacity must admit at least one request.
    #[error("rate.burst must be >= 1 (got {provided})")]
    InvalidBurst {
        /// Value provided by caller.
        provided: u32,
    },
    /// Refill rate must be a finite, positive number of tokens per second.
    #[error("rate.refillPerSecond must be finite and > 0 (got {provided})")]
    InvalidRefillRate {
        /// Value provided by caller.
        provided: f64,
    },
    /// A duration option that must be non-zero was zero.
    #[error("{option} must be > 0")]
    ZeroDuration {
        /// Dotted option name.
        option: &'static str,
    },
    /// Entries would be evicted before the sweep could ever observe them as idle.
    #[error(
        "eviction.idleThreshold ({idle_threshold:?}) must be >= \
         eviction.sweepInterval ({sweep_interval:?})"
    )]
    IdleThresholdTooShort {
        /// Configured idle threshold.
        idle_threshold: Duration,
        /// Configured sweep interval.
        sweep_interval: Duration,
    },
}

/// The gate could not make an admission decision for a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// No client identifier could be derived from the connection.
    #[error("client identity could not be derived from the connection")]
    MissingIdentity,
}

/// Background work submission failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Shutdown has closed the tracker; no new work is accepted.
    #[error("background task '{task}' rejected: tracker is closed for shutdown")]
    Closed {
        /// Name of the rejected task.
        task: String,
    },
}

/// Terminal outcomes of
/// [`ShutdownCoordinator::serve`](crate::shutdown::ShutdownCoordinator::serve).
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The listener failed, either while serving or while shutting down.
    #[error("listener failed: {0}")]
    Listener(#[source] std::io::Error),
    /// The server task itself died (panicked or was cancelled).
    #[error("server task aborted: {0}")]
    ServerTask(String),
    /// In-flight requests did not finish within the drain deadline.
    #[error("listener drain exceeded deadline of {deadline:?}")]
    DrainTimeout {
        /// Configured drain deadline.
        deadline: Duration,
    },
    /// Background work did not finish within the configured bound.
    #[error("background work still running after {deadline:?} ({in_flight} in flight)")]
    BackgroundWorkTimeout {
        /// Configured background deadline.
        deadline: Duration,
        /// Tasks still in flight when the deadline passed.
        in_flight: usize,
    },
    /// Termination signal handlers could not be installed.
    #[error("failed to listen for termination signals: {0}")]
    Signal(#[source] std::io::Error),
}

impl ShutdownError {
    /// Whether the failure was a deadline (drain or background) rather than an I/O fault.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::DrainTimeout { .. } | Self::BackgroundWorkTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn config_error_names_the_option() {
        let err = ConfigError::ZeroDuration { option: "shutdown.drainTimeout" };
        assert_eq!(err.to_string(), "shutdown.drainTimeout must be > 0");
        let err = ConfigError::InvalidBurst { provided: 0 };
        assert!(err.to_string().contains("rate.burst"));
    }

    #[test]
    fn listener_error_exposes_source() {
        let err = ShutdownError::Listener(io::Error::other("accept failed"));
        assert!(err.to_string().contains("accept failed"));
        assert!(err.source().is_some());
        assert!(!err.is_timeout());
    }

    #[test]
    fn deadline_errors_are_timeouts() {
        let drain = ShutdownError::DrainTimeout { deadline: Duration::from_secs(20) };
        assert!(drain.is_timeout());
        assert!(drain.to_string().contains("20s"));
        let background = ShutdownError::BackgroundWorkTimeout {
            deadline: Duration::from_secs(5),
            in_flight: 2,
        };
        assert!(background.is_timeout());
        assert!(background.to_string().contains("2 in flight"));
    }

    #[test]
    fn closed_task_error_names_task() {
        let err = TaskError::Closed { task: "welcome_email".into() };
        assert!(err.to_string().contains("welcome_email"));
    }
}
