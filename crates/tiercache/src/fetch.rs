//! A single-resolution future result with callback registration.

use std::sync::{Arc, Mutex};

use crate::CacheError;

/// A success callback, invoked with the resolved value.
pub type SuccessFn<T> = Box<dyn FnOnce(T) + Send + 'static>;
/// A failure callback, invoked with the resolution error.
pub type FailureFn = Box<dyn FnOnce(CacheError) + Send + 'static>;

enum State<T> {
    Pending {
        on_success: Vec<SuccessFn<T>>,
        on_failure: Vec<FailureFn>,
    },
    Succeeded(T),
    Failed(CacheError),
}

/// The future result of a cache or fetcher operation.
///
/// A `Fetch` resolves at most once, either via [`succeed`](Self::succeed)
/// or [`fail`](Self::fail); later resolution attempts are ignored.
/// Callbacks registered after resolution fire immediately with the
/// resolved outcome. Callback delivery is serialized per instance.
///
/// Cloning is cheap and shares the resolution state.
pub struct Fetch<T> {
    inner: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Fetch<T> {
    fn clone(&self) -> Self {
        Fetch {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Default for Fetch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Fetch<T> {
    /// Creates a pending `Fetch`.
    pub fn new() -> Self {
        Fetch {
            inner: Arc::new(Mutex::new(State::Pending {
                on_success: Vec::new(),
                on_failure: Vec::new(),
            })),
        }
    }

    /// Registers a success callback.
    ///
    /// Fires immediately if the fetch already succeeded. Returns `self`
    /// for chaining.
    pub fn on_success(self, f: impl FnOnce(T) + Send + 'static) -> Self {
        let resolved = {
            let mut state = self.inner.lock().unwrap();
            match &mut *state {
                State::Pending { on_success, .. } => {
                    on_success.push(Box::new(f));
                    None
                }
                State::Succeeded(value) => Some((Box::new(f) as SuccessFn<T>, value.clone())),
                State::Failed(_) => None,
            }
        };
        if let Some((f, value)) = resolved {
            f(value);
        }
        self
    }

    /// Registers a failure callback.
    ///
    /// Fires immediately if the fetch already failed. Returns `self`
    /// for chaining.
    pub fn on_failure(self, f: impl FnOnce(CacheError) + Send + 'static) -> Self {
        let resolved = {
            let mut state = self.inner.lock().unwrap();
            match &mut *state {
                State::Pending { on_failure, .. } => {
                    on_failure.push(Box::new(f));
                    None
                }
                State::Succeeded(_) => None,
                State::Failed(error) => Some((Box::new(f) as FailureFn, error.clone())),
            }
        };
        if let Some((f, error)) = resolved {
            f(error);
        }
        self
    }

    /// Resolves the fetch with `value`.
    ///
    /// A no-op if the fetch is already resolved.
    pub fn succeed(&self, value: T) {
        let callbacks = {
            let mut state = self.inner.lock().unwrap();
            match &mut *state {
                State::Pending { on_success, .. } => {
                    let callbacks = std::mem::take(on_success);
                    *state = State::Succeeded(value.clone());
                    callbacks
                }
                _ => {
                    tracing::debug!("fetch already resolved, ignoring succeed");
                    return;
                }
            }
        };
        for callback in callbacks {
            callback(value.clone());
        }
    }

    /// Resolves the fetch with `error`.
    ///
    /// A no-op if the fetch is already resolved.
    pub fn fail(&self, error: CacheError) {
        let callbacks = {
            let mut state = self.inner.lock().unwrap();
            match &mut *state {
                State::Pending { on_failure, .. } => {
                    let callbacks = std::mem::take(on_failure);
                    *state = State::Failed(error.clone());
                    callbacks
                }
                _ => {
                    tracing::debug!("fetch already resolved, ignoring fail");
                    return;
                }
            }
        };
        for callback in callbacks {
            callback(error.clone());
        }
    }

    /// Whether the fetch resolved successfully.
    ///
    /// Useful to decide synchronously whether a placeholder is needed
    /// before any asynchronous work could have completed.
    pub fn has_succeeded(&self) -> bool {
        matches!(*self.inner.lock().unwrap(), State::Succeeded(_))
    }

    /// Whether the fetch resolved with a failure.
    pub fn has_failed(&self) -> bool {
        matches!(*self.inner.lock().unwrap(), State::Failed(_))
    }
}
