use crate::rate_limit::{Decision, RateLimitGate};
use crate::response;
use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::response::Response;
use futures::future::{self, Either, Ready};
use std::net::SocketAddr;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;
use tracing::{error, warn};

/// Explicit client identifier placed in request extensions by an upstream layer
/// (for example one that trusts a proxy header). Takes precedence over the peer address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

/// Client identity for a request: an explicit [`ClientId`], else the peer IP
/// (port stripped) from `ConnectInfo<SocketAddr>`.
pub fn client_identity<B>(req: &Request<B>) -> Option<String> {
    if let Some(ClientId(id)) = req.extensions().get::<ClientId>() {
        return Some(id.clone());
    }
    req.extensions().get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// A layer that enforces per-client limits using a [`RateLimitGate`].
#[derive(Clone, Debug)]
pub struct RateLimitLayer {
    gate: RateLimitGate,
}

impl RateLimitLayer {
    /// Create a new rate limit layer.
    pub fn new(gate: RateLimitGate) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService { inner: service, gate: self.gate.clone() }
    }
}

/// Middleware service that enforces rate limits.
///
/// Denied requests get `429` and never reach the inner service; a request with no
/// derivable identity gets `500`.
#[derive(Clone, Debug)]
pub struct RateLimitService<S> {
    inner: S,
    gate: RateLimitGate,
}

impl<S, B> Service<Request<B>> for RateLimitService<S>
where
    S: Service<Request<B>, Response = Response>,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Either<Ready<Result<Response, S::Error>>, S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let identity = client_identity(&req);
        match self.gate.check(identity.as_deref()) {
            Ok(Decision::Allowed { .. }) | Ok(Decision::Bypassed) => {
                Either::Right(self.inner.call(req))
            }
            Ok(Decision::Denied { wait }) => {
                warn!(
                    target: "greenlight::rate_limit",
                    client = identity.as_deref().unwrap_or_default(),
                    method = %req.method(),
                    uri = %req.uri(),
                    "rate limit exceeded"
                );
                Either::Left(future::ready(Ok(response::rate_limit_exceeded(wait))))
            }
            Err(err) => {
                error!(
                    target: "greenlight::rate_limit",
                    error = %err,
                    method = %req.method(),
                    uri = %req.uri(),
                    "admission check failed"
                );
                Either::Left(future::ready(Ok(response::server_error())))
            }
        }
    }
}
