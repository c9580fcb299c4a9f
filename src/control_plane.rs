//! Composition root: one [`ControlPlane`] per server.
//!
//! Wraps an application router as
//!
//! ```text
//! metrics → recover → rate limit → app
//! ```
//!
//! so every request, including a rate-limited or panicking one, is counted, and a
//! panic in the app never escapes the recovery layer. `GET /v1/metrics` is mounted on
//! the wrapped router and goes through the same layers.
//!
//! Besides the request counters, the document carries these gauges:
//!
//! - `version`: crate version
//! - `timestamp`: Unix seconds at render time
//! - `tasks`: live tokio tasks on the current runtime, the async counterpart of a
//!   thread or goroutine count; `null` when rendered outside a runtime
//! - `background_tasks_in_flight`: work tracked by [`BackgroundTasks`]
//! - `rate_limit_clients`: clients currently held by the rate-limit registry

use crate::clock::{Clock, MonotonicClock};
use crate::config::ControlConfig;
use crate::dynamic::DynamicConfig;
use crate::error::{ConfigError, ShutdownError};
use crate::metrics::{MetricsEndpoint, MetricsLayer, RequestMetrics};
use crate::rate_limit::{ClientRegistry, RateLimitGate, RateLimitLayer};
use crate::recover::CatchPanicLayer;
use crate::shutdown::{termination_signal, ShutdownCoordinator, ShutdownState, TerminationSignal};
use crate::tasks::BackgroundTasks;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

/// Path of the read-only metrics endpoint.
pub const METRICS_PATH: &str = "/v1/metrics";

/// Owns the shared components and wires them around an application.
///
/// ```rust,no_run
/// use axum::{routing::get, Router};
/// use greenlight::{ControlConfig, ControlPlane};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let plane = ControlPlane::new(ControlConfig::default())?;
/// let app = Router::new().route("/v1/healthcheck", get(|| async { "available" }));
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:4000").await?;
/// plane.serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ControlPlane {
    config: ControlConfig,
    gate: RateLimitGate,
    tasks: BackgroundTasks,
    endpoint: MetricsEndpoint,
    coordinator: ShutdownCoordinator,
}

impl ControlPlane {
    /// Validate `config` and build the components on the monotonic clock.
    pub fn new(config: ControlConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, MonotonicClock::default())
    }

    /// Like [`new`](Self::new), with the clock used for token refill and idleness.
    pub fn with_clock<C: Clock + 'static>(
        config: ControlConfig,
        clock: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let settings = DynamicConfig::new(config.rate.clone());
        let registry = Arc::new(
            ClientRegistry::new(settings, config.eviction.idle_threshold()).with_clock(clock),
        );
        let gate = RateLimitGate::new(Arc::clone(&registry));
        let tasks = BackgroundTasks::new();
        let endpoint = MetricsEndpoint::new(Arc::new(RequestMetrics::new()));
        publish_default_gauges(&endpoint, &tasks, &registry);
        let coordinator = ShutdownCoordinator::new(tasks.clone(), config.shutdown.clone());

        Ok(Self { config, gate, tasks, endpoint, coordinator })
    }

    /// Settings this plane was built with. Live rate settings are on [`gate`](Self::gate).
    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Admission gate; use it to flip rate limiting at runtime.
    pub fn gate(&self) -> &RateLimitGate {
        &self.gate
    }

    /// Tracker for background work submitted by handlers.
    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Request counters.
    pub fn metrics(&self) -> &Arc<RequestMetrics> {
        self.endpoint.metrics()
    }

    /// Metrics document source; publish extra gauges here.
    pub fn endpoint(&self) -> &MetricsEndpoint {
        &self.endpoint
    }

    /// Current shutdown state.
    pub fn state(&self) -> ShutdownState {
        self.coordinator.state()
    }

    /// Shutdown coordinator driving [`serve`](Self::serve).
    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }

    /// Mount the metrics endpoint on `app` and apply the layers.
    pub fn wrap(&self, app: Router) -> Router {
        let endpoint = self.endpoint.clone();
        app.route(
            METRICS_PATH,
            get(move || {
                let doc = endpoint.render();
                async move { Json(doc) }
            }),
        )
        .layer(RateLimitLayer::new(self.gate.clone()))
        .layer(CatchPanicLayer::new())
        .layer(MetricsLayer::new(Arc::clone(self.endpoint.metrics())))
    }

    /// Start the periodic idle-client sweep. Stops on its own once the plane is dropped.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.gate.registry().spawn_sweeper(self.config.eviction.sweep_interval)
    }

    /// Serve the wrapped `app` until SIGINT or SIGTERM, then shut down gracefully.
    pub async fn serve(&self, listener: TcpListener, app: Router) -> Result<(), ShutdownError> {
        self.serve_with_signal(listener, app, termination_signal()).await
    }

    /// [`serve`](Self::serve) with a caller-supplied termination trigger.
    pub async fn serve_with_signal<F>(
        &self,
        listener: TcpListener,
        app: Router,
        signal: F,
    ) -> Result<(), ShutdownError>
    where
        F: Future<Output = io::Result<TerminationSignal>>,
    {
        let sweeper = self.spawn_sweeper();
        info!(
            target: "greenlight::control_plane",
            rate_limit_enabled = self.gate.is_enabled(),
            refill_per_second = self.config.rate.refill_per_second,
            burst = self.config.rate.burst,
            "control plane starting"
        );
        let result = self.coordinator.serve_with_signal(listener, self.wrap(app), signal).await;
        sweeper.abort();
        result
    }
}

fn publish_default_gauges(
    endpoint: &MetricsEndpoint,
    tasks: &BackgroundTasks,
    registry: &Arc<ClientRegistry>,
) {
    endpoint.publish("version", || json!(env!("CARGO_PKG_VERSION")));
    endpoint.publish("timestamp", || {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        json!(secs)
    });
    endpoint.publish("tasks", || match tokio::runtime::Handle::try_current() {
        Ok(handle) => json!(handle.metrics().num_alive_tasks()),
        Err(_) => Value::Null,
    });

    let tasks = tasks.clone();
    endpoint.publish("background_tasks_in_flight", move || json!(tasks.in_flight()));

    // Weak so the gauge does not keep the registry (and its sweeper) alive.
    let registry = Arc::downgrade(registry);
    endpoint.publish("rate_limit_clients", move || match registry.upgrade() {
        Some(registry) => json!(registry.len()),
        None => json!(0),
    });
}
