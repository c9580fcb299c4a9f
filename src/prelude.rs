//! Convenient re-exports for common Greenlight types.
pub use crate::{
    config::{ControlConfig, ControlConfigBuilder},
    control_plane::ControlPlane,
    error::{AdmissionError, ConfigError, ShutdownError, TaskError},
    metrics::{MetricsEndpoint, MetricsLayer, RequestMetrics},
    rate_limit::{ClientId, Decision, RateLimitGate, RateLimitLayer},
    recover::CatchPanicLayer,
    shutdown::{ShutdownCoordinator, ShutdownState, TerminationSignal},
    tasks::BackgroundTasks,
};
