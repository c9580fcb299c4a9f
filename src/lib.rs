#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Greenlight 🚦
//!
//! The control plane of a JSON HTTP API server: the pieces that decide whether a
//! request is admitted, keep the process observable, and stop it cleanly.
//!
//! ## Features
//!
//! - **Per-client rate limiting** with token buckets, idle eviction, and a runtime on/off switch
//! - **Background task tracking** so fire-and-forget work survives a graceful shutdown
//! - **Graceful shutdown** on SIGINT/SIGTERM with a bounded drain and an observable state machine
//! - **Request metrics** (counts, status histogram, processing time) behind `GET /v1/metrics`
//! - **Panic isolation** so a failing handler answers `500` instead of taking the server down
//!
//! All of it is tower middleware and plain tokio tasks; the app is any axum
//! [`Router`](axum::Router).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{routing::post, Router};
//! use greenlight::{ControlConfig, ControlPlane};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ControlConfig::builder()
//!         .refill_per_second(2.0)
//!         .burst(4)
//!         .drain_timeout(Duration::from_secs(20))
//!         .build()?;
//!     let plane = ControlPlane::new(config)?;
//!
//!     let tasks = plane.tasks().clone();
//!     let app = Router::new().route(
//!         "/v1/users",
//!         post(move || {
//!             let _ = tasks.submit("welcome_email", async { Ok::<_, std::io::Error>(()) });
//!             async { "created" }
//!         }),
//!     );
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:4000").await?;
//!     plane.serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod control_plane;
pub mod dynamic;
pub mod error;
pub mod metrics;
pub mod prelude;
pub mod rate_limit;
pub mod recover;
pub mod response;
pub mod shutdown;
pub mod tasks;

// Re-exports
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{
    ConfigLoadError, ControlConfig, ControlConfigBuilder, EvictionSettings, RateLimitSettings,
    ShutdownSettings,
};
pub use control_plane::{ControlPlane, METRICS_PATH};
pub use dynamic::DynamicConfig;
pub use error::{AdmissionError, ConfigError, ShutdownError, TaskError};
pub use metrics::{MetricsEndpoint, MetricsLayer, MetricsSnapshot, RequestMetrics, StatusCapture};
pub use rate_limit::{
    ClientId, ClientRegistry, Decision, RateLimitGate, RateLimitLayer, TokenBucket,
};
pub use recover::CatchPanicLayer;
pub use shutdown::{termination_signal, ShutdownCoordinator, ShutdownState, TerminationSignal};
pub use tasks::{BackgroundTasks, TaskGuard};
