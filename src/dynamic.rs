//! Live-updatable settings shared between the gate and whoever manages config.
//!
//! Reads are lock-free (`ArcSwap`), so the admission hot path never contends with
//! an operator flipping a switch.

use arc_swap::{ArcSwap, Guard};
use std::sync::Arc;

/// Shared handle to a value that can be swapped at runtime.
///
/// Clones observe the same value.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    inner: Arc<ArcSwap<T>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> DynamicConfig<T> {
    /// Wrap an initial value.
    pub fn new(value: T) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
    }

    /// Snapshot the current value.
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Derive a new value from the current one, or leave it untouched if `f` refuses.
    ///
    /// Concurrent updates are retried, so `f` may run more than once.
    pub fn try_update<F, E>(&self, f: F) -> Result<(), E>
    where
        F: Fn(&T) -> Result<T, E>,
    {
        let mut current = self.inner.load_full();
        loop {
            let next = Arc::new(f(&current)?);
            let previous = self.inner.compare_and_swap(&current, next);
            if Arc::ptr_eq(&*previous, &current) {
                return Ok(());
            }
            current = Guard::into_inner(previous);
        }
    }
}
