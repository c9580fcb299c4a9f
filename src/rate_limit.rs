//! Per-client admission control.
//!
//! - [`TokenBucket`]: one client's refill/burst state.
//! - [`ClientRegistry`]: client id → bucket map behind a single lock, with an idle sweep.
//! - [`RateLimitGate`]: the per-request decision, honoring the global on/off switch.
//! - [`RateLimitLayer`]: tower middleware that turns a denial into `429 Too Many Requests`.
//!
//! # Architecture
//!
//! The middleware only knows how to find a client identity on a request and how to
//! render a decision. The gate owns the switch; the registry owns the buckets and is
//! injected, so tests can drive it with a [`ManualClock`](crate::clock::ManualClock).

use std::time::Duration;

pub mod bucket;
pub mod gate;
pub mod middleware;
pub mod registry;

pub use bucket::TokenBucket;
pub use gate::RateLimitGate;
pub use middleware::{ClientId, RateLimitLayer, RateLimitService};
pub use registry::ClientRegistry;

/// The decision returned by an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// The request may proceed; one token was taken.
    Allowed {
        /// Whole tokens left in the bucket after this request.
        remaining: u32,
    },
    /// The bucket is empty.
    Denied {
        /// Time until the next token becomes available.
        /// Useful for `Retry-After` headers.
        wait: Duration,
    },
    /// Rate limiting is switched off; the registry was not consulted.
    Bypassed,
}

impl Decision {
    /// True for [`Decision::Allowed`] and [`Decision::Bypassed`].
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Denied { .. })
    }
}
