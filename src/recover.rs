//! Panic isolation for request handlers.
//!
//! A panic in the inner service (while building the future or while polling it) is
//! caught, logged at error level, and answered with a `500` carrying
//! `Connection: close` so the server drops the connection after responding.

use crate::response;
use axum::http::{header, HeaderValue, Request};
use axum::response::Response;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;
use tracing::error;

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn panic_response(payload: &(dyn Any + Send), method: &str, uri: &str) -> Response {
    error!(
        target: "greenlight::recover",
        panic = %panic_message(payload),
        method,
        uri,
        "request handler panicked"
    );
    let mut res = response::server_error();
    res.headers_mut().insert(header::CONNECTION, HeaderValue::from_static("close"));
    res
}

/// Layer applying [`CatchPanicService`].
#[derive(Clone, Debug, Default)]
pub struct CatchPanicLayer;

impl CatchPanicLayer {
    /// Create the layer.
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for CatchPanicLayer {
    type Service = CatchPanicService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CatchPanicService { inner }
    }
}

/// Converts handler panics into `500` responses.
#[derive(Clone, Debug)]
pub struct CatchPanicService<S> {
    inner: S,
}

impl<S, B> Service<Request<B>> for CatchPanicService<S>
where
    S: Service<Request<B>, Response = Response>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let method = req.method().to_string();
        let uri = req.uri().to_string();
        let inner = &mut self.inner;
        match std::panic::catch_unwind(AssertUnwindSafe(move || inner.call(req))) {
            Ok(fut) => Box::pin(async move {
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => Ok(panic_response(&*payload, &method, &uri)),
                }
            }),
            Err(payload) => {
                let res = panic_response(&*payload, &method, &uri);
                Box::pin(async move { Ok(res) })
            }
        }
    }
}
