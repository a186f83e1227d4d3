//! Apartment threading
//!
//! The external model requires every call against an object to happen on
//! the thread that owns the object's apartment. An [`ApartmentThread`] owns
//! one dedicated worker thread, initializes the native runtime on it and
//! funnels all work through a single unbounded queue.

mod thread;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::types::Result;

pub use thread::ApartmentThread;
pub(crate) use thread::panic_message;

/// Lifecycle of an apartment's worker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApartmentState {
    /// No worker; the next call starts one
    Uninitialized,
    /// A worker is running native runtime initialization
    Initializing,
    /// The worker accepts work
    Ready,
    /// Native runtime initialization failed; the next call retries
    Faulted,
}

/// Future returned by [`ApartmentThread::submit`]
pub type WorkFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// Callback run after a work item panicked and killed the worker
pub type FaultHandler = Arc<dyn Fn(&str) + Send + Sync>;
