//! Client id → token bucket map with idle eviction.

use crate::clock::{Clock, MonotonicClock};
use crate::config::RateLimitSettings;
use crate::dynamic::DynamicConfig;
use crate::error::ConfigError;
use crate::rate_limit::{Decision, TokenBucket};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

#[derive(Debug)]
struct ClientEntry {
    bucket: TokenBucket,
    last_seen: Duration,
}

/// Owns every client's bucket. All reads and writes of the map, including the idle
/// sweep, happen under one mutex, so admission checks never interleave.
///
/// Bucket parameters are read from the shared settings when a bucket is created;
/// changing them later affects new clients only.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, ClientEntry>>,
    settings: DynamicConfig<RateLimitSettings>,
    idle_threshold: Duration,
    clock: Arc<dyn Clock>,
}

impl ClientRegistry {
    /// Create an empty registry evicting clients idle for longer than `idle_threshold`.
    pub fn new(settings: DynamicConfig<RateLimitSettings>, idle_threshold: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            settings,
            idle_threshold,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Current bucket settings and switch.
    pub fn settings(&self) -> Arc<RateLimitSettings> {
        self.settings.get()
    }

    /// Derive new settings from the current ones.
    ///
    /// The result is validated first; an invalid result is rejected and the live
    /// settings stay as they were.
    pub fn update_settings<F>(&self, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&RateLimitSettings) -> RateLimitSettings,
    {
        self.settings.try_update(|current| {
            let next = f(current);
            next.validate()?;
            Ok(next)
        })
    }

    // The critical sections below never leave a bucket half-updated, so a poisoned
    // lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ClientEntry>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up (or create) the client's bucket, refill it and try to take a token.
    ///
    /// `last_seen` is refreshed whether or not the request is admitted.
    pub fn admit(&self, client: &str) -> Decision {
        let mut clients = self.lock();
        let now = self.clock.now();
        let entry = clients.entry(client.to_owned()).or_insert_with(|| {
            let settings = self.settings.get();
            ClientEntry {
                bucket: TokenBucket::new(settings.burst, settings.refill_per_second, now),
                last_seen: now,
            }
        });
        entry.last_seen = now;
        entry.bucket.try_acquire(now)
    }

    /// Remove every client not seen within the idle threshold. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut clients = self.lock();
        let now = self.clock.now();
        let before = clients.len();
        clients.retain(|_, entry| now.saturating_sub(entry.last_seen) <= self.idle_threshold);
        let evicted = before - clients.len();
        debug!(
            target: "greenlight::rate_limit",
            evicted,
            remaining = clients.len(),
            "idle client sweep finished"
        );
        evicted
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no client is tracked.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether a bucket currently exists for `client`.
    pub fn contains(&self, client: &str) -> bool {
        self.lock().contains_key(client)
    }

    /// Current token level for `client`, if tracked. Does not refill.
    pub fn tokens(&self, client: &str) -> Option<f64> {
        self.lock().get(client).map(|entry| entry.bucket.tokens())
    }

    /// Run [`sweep`](Self::sweep) every `interval` on the tokio runtime.
    ///
    /// The task holds only a weak reference and exits once the registry is dropped.
    /// Ticks are never run concurrently; a slow sweep delays the next one.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; nothing can be idle yet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match registry.upgrade() {
                    Some(registry) => {
                        registry.sweep();
                    }
                    None => break,
                }
            }
        })
    }
}
