//! Request/response counters and the status-code histogram.
//!
//! [`MetricsLayer`] sits outermost in the middleware stack. Each request bumps
//! `requests_received` on entry; when the response is produced its status is
//! captured once and `responses_sent`, the per-status count and the accumulated
//! processing time are updated. Every counter is an independent atomic: no update
//! is ever lost, but a [`MetricsSnapshot`] is not transactional across fields.
//!
//! The per-status count is bumped before `responses_sent` is released, and a snapshot
//! acquires `responses_sent` before reading the histogram, so a snapshot never shows
//! more responses sent than the histogram accounts for.

use axum::http::Request;
use axum::response::Response;
use pin_project::pin_project;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower_layer::Layer;
use tower_service::Service;

const MIN_STATUS: u16 = 100;
const MAX_STATUS: u16 = 999;
const DEFAULT_STATUS: u16 = 200;

/// Records the status of one response, at most once.
///
/// The first [`capture`](Self::capture) wins; later calls are ignored. If nothing
/// was captured, [`status`](Self::status) reports `200`, matching a response whose
/// body was written without an explicit status.
#[derive(Debug, Default)]
pub struct StatusCapture {
    code: AtomicU16,
}

impl StatusCapture {
    /// Empty capture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `code` unless a status was already captured. Returns whether this call won.
    pub fn capture(&self, code: u16) -> bool {
        self.code.compare_exchange(0, code, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Captured status, or `200` if none.
    pub fn status(&self) -> u16 {
        match self.code.load(Ordering::Acquire) {
            0 => DEFAULT_STATUS,
            code => code,
        }
    }
}

/// Process-lifetime request counters. Never reset.
#[derive(Debug)]
pub struct RequestMetrics {
    requests_received: AtomicU64,
    responses_sent: AtomicU64,
    requests_abandoned: AtomicU64,
    processing_time_us: AtomicU64,
    by_status: Box<[AtomicU64]>,
}

impl Default for RequestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestMetrics {
    /// All counters at zero.
    pub fn new() -> Self {
        let slots = usize::from(MAX_STATUS - MIN_STATUS) + 1;
        Self {
            requests_received: AtomicU64::new(0),
            responses_sent: AtomicU64::new(0),
            requests_abandoned: AtomicU64::new(0),
            processing_time_us: AtomicU64::new(0),
            by_status: (0..slots).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Count an inbound request.
    pub fn record_request(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a completed response. Out-of-range codes are clamped into 100..=999.
    pub fn record_response(&self, status: u16, elapsed: Duration) {
        let slot = usize::from(status.clamp(MIN_STATUS, MAX_STATUS) - MIN_STATUS);
        self.by_status[slot].fetch_add(1, Ordering::Relaxed);
        self.responses_sent.fetch_add(1, Ordering::Release);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.processing_time_us.fetch_add(micros, Ordering::Relaxed);
    }

    /// Count a request whose response future was dropped before completing.
    pub fn record_abandoned(&self) {
        self.requests_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Best-effort view of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        // Before the histogram: every response counted here is already in a slot.
        let responses_sent = self.responses_sent.load(Ordering::Acquire);
        let by_status = self
            .by_status
            .iter()
            .enumerate()
            .filter_map(|(slot, count)| {
                let count = count.load(Ordering::Relaxed);
                // `slot` is bounded by the array length, which fits in u16.
                (count > 0).then(|| ((MIN_STATUS + slot as u16).to_string(), count))
            })
            .collect();
        let requests_received = self.requests_received.load(Ordering::Relaxed);
        let requests_abandoned = self.requests_abandoned.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests_received,
            responses_sent,
            requests_abandoned,
            active_requests: requests_received
                .saturating_sub(responses_sent)
                .saturating_sub(requests_abandoned),
            processing_time_us: self.processing_time_us.load(Ordering::Relaxed),
            responses_by_status: by_status,
        }
    }
}

/// Point-in-time copy of [`RequestMetrics`], serialized with the metrics endpoint's field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Requests that entered the stack.
    #[serde(rename = "total_requests_received")]
    pub requests_received: u64,
    /// Responses produced.
    #[serde(rename = "total_responses_sent")]
    pub responses_sent: u64,
    /// Requests dropped before a response was produced.
    #[serde(rename = "total_requests_abandoned")]
    pub requests_abandoned: u64,
    /// Received minus sent minus abandoned.
    #[serde(rename = "total_active_requests")]
    pub active_requests: u64,
    /// Sum of processing durations in microseconds.
    #[serde(rename = "total_processing_time_μs")]
    pub processing_time_us: u64,
    /// Response count keyed by status code.
    #[serde(rename = "total_responses_sent_by_status")]
    pub responses_by_status: BTreeMap<String, u64>,
}

type Gauge = Arc<dyn Fn() -> Value + Send + Sync>;

/// Read side of the metrics endpoint: the request counters plus named gauges
/// published by collaborators (runtime task counts, pool statistics, ...).
#[derive(Clone)]
pub struct MetricsEndpoint {
    metrics: Arc<RequestMetrics>,
    gauges: Arc<RwLock<HashMap<String, Gauge>>>,
}

impl std::fmt::Debug for MetricsEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .gauges
            .read()
            .map(|g| g.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("MetricsEndpoint").field("gauges", &names).finish()
    }
}

impl MetricsEndpoint {
    /// Endpoint over `metrics` with no gauges.
    pub fn new(metrics: Arc<RequestMetrics>) -> Self {
        Self { metrics, gauges: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Publish a gauge evaluated on every read. A later gauge with the same name replaces it.
    pub fn publish<F>(&self, name: impl Into<String>, gauge: F)
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        let mut gauges = self.gauges.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        gauges.insert(name.into(), Arc::new(gauge));
    }

    /// Counters.
    pub fn metrics(&self) -> &Arc<RequestMetrics> {
        &self.metrics
    }

    /// JSON document: counter fields first, then gauges. Gauges cannot shadow counters.
    pub fn render(&self) -> Value {
        let mut doc = match serde_json::to_value(self.metrics.snapshot()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        // Evaluate outside the lock so a slow gauge cannot block `publish`.
        let gauges: Vec<(String, Gauge)> = self
            .gauges
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(name, gauge)| (name.clone(), Arc::clone(gauge)))
            .collect();
        for (name, gauge) in gauges {
            doc.entry(name).or_insert_with(|| gauge());
        }
        Value::Object(doc)
    }
}

/// Layer applying [`MetricsService`].
#[derive(Clone, Debug)]
pub struct MetricsLayer {
    metrics: Arc<RequestMetrics>,
}

impl MetricsLayer {
    /// Record into `metrics`.
    pub fn new(metrics: Arc<RequestMetrics>) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner, metrics: Arc::clone(&self.metrics) }
    }
}

/// Observes every request/response pair passing through.
#[derive(Clone, Debug)]
pub struct MetricsService<S> {
    inner: S,
    metrics: Arc<RequestMetrics>,
}

impl<S, B> Service<Request<B>> for MetricsService<S>
where
    S: Service<Request<B>, Response = Response>,
{
    type Response = Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        self.metrics.record_request();
        let observation = Observation {
            metrics: Arc::clone(&self.metrics),
            start: Instant::now(),
            status: StatusCapture::new(),
            finished: false,
        };
        ResponseFuture { inner: self.inner.call(req), observation }
    }
}

#[derive(Debug)]
struct Observation {
    metrics: Arc<RequestMetrics>,
    start: Instant,
    status: StatusCapture,
    finished: bool,
}

impl Observation {
    fn finish(&mut self, status: u16) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.status.capture(status);
        self.metrics.record_response(self.status.status(), self.start.elapsed());
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics.record_abandoned();
        }
    }
}

/// Response future for [`MetricsService`].
#[pin_project]
#[derive(Debug)]
pub struct ResponseFuture<F> {
    #[pin]
    inner: F,
    observation: Observation,
}

impl<F, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response, E>>,
{
    type Output = Result<Response, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = futures::ready!(this.inner.poll(cx));
        let status = match &result {
            Ok(res) => res.status().as_u16(),
            // Errors reaching the outermost layer are turned into 500s by the server.
            Err(_) => 500,
        };
        this.observation.finish(status);
        Poll::Ready(result)
    }
}
