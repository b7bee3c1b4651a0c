//! Pluggable, cancellable value sources.

use std::sync::Mutex;

use crate::fetch::{FailureFn, SuccessFn};
use crate::value::CacheValue;

mod disk;
mod network;

pub use disk::DiskFetcher;
pub use network::NetworkFetcher;

/// A source of a value for a stable key.
///
/// Implementations acquire the value asynchronously and deliver it
/// through exactly one of the two callbacks. `cancel` suppresses
/// callback delivery for work already in flight; it does not
/// un-resolve anything that was already delivered.
///
/// External collaborators can provide their own implementations (for
/// example a fetcher bound to a widget's lifecycle) as long as they
/// honor this contract.
pub trait Fetcher<T: CacheValue>: Send + Sync {
    /// The cache key this fetcher produces a value for.
    fn key(&self) -> &str;

    /// Starts acquiring the value.
    fn fetch(&self, on_failure: FailureFn, on_success: SuccessFn<T>);

    /// Cancels an in-flight acquisition, suppressing its callbacks.
    fn cancel(&self) {}
}

enum LazyValue<T> {
    Ready(T),
    Thunk(Box<dyn Fn() -> T + Send + Sync>),
}

/// A fetcher wrapping an already-available (or lazily produced) value.
///
/// Resolution is synchronous; `cancel` is a no-op. A lazy value is
/// produced once and memoized.
pub struct SimpleFetcher<T> {
    key: String,
    value: Mutex<LazyValue<T>>,
}

impl<T: CacheValue + Clone> SimpleFetcher<T> {
    /// Wraps an available value.
    pub fn new(key: impl Into<String>, value: T) -> Self {
        SimpleFetcher {
            key: key.into(),
            value: Mutex::new(LazyValue::Ready(value)),
        }
    }

    /// Wraps a value produced on first fetch.
    pub fn lazy(key: impl Into<String>, thunk: impl Fn() -> T + Send + Sync + 'static) -> Self {
        SimpleFetcher {
            key: key.into(),
            value: Mutex::new(LazyValue::Thunk(Box::new(thunk))),
        }
    }
}

impl<T> Fetcher<T> for SimpleFetcher<T>
where
    T: CacheValue + Clone + Send + Sync + 'static,
{
    fn key(&self) -> &str {
        &self.key
    }

    fn fetch(&self, _on_failure: FailureFn, on_success: SuccessFn<T>) {
        let value = {
            let mut state = self.value.lock().unwrap();
            match &*state {
                LazyValue::Ready(value) => value.clone(),
                LazyValue::Thunk(thunk) => {
                    let value = thunk();
                    *state = LazyValue::Ready(value.clone());
                    value
                }
            }
        };
        on_success(value);
    }
}
