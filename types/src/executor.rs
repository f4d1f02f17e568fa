//! The seam between asynchronous completion and the context that observes it.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::result::CallResult;

/// A unit of work handed to a [`CompletionContext`].
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// A per-call completion closure, invoked with the call's own result once
/// its envelope has been executed.
///
/// The closure fires at most once; a handler whose closure has already been
/// consumed ignores later invocations. Clones share the same underlying
/// closure, so a descriptor can be cloned freely without double delivery.
#[derive(Clone)]
pub struct CompletionHandler {
    inner: Arc<Mutex<Option<Box<dyn FnOnce(CallResult) + Send>>>>,
}

impl CompletionHandler {
    #[must_use]
    pub fn new(on_completed: impl FnOnce(CallResult) + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(on_completed)))),
        }
    }

    /// Hand the call's result to the closure. At most the first invocation
    /// across all clones runs it.
    pub fn invoke(&self, result: CallResult) {
        let handler = self
            .inner
            .lock()
            .expect("completion handler lock poisoned")
            .take();
        if let Some(handler) = handler {
            handler(result);
        }
    }
}

impl fmt::Debug for CompletionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompletionHandler(..)")
    }
}

impl PartialEq for CompletionHandler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// An execution context that can receive posted work.
///
/// Asynchronous completion handlers normally run on arbitrary worker
/// threads. Implementors of this trait give callers a single place where
/// completions are observed instead: the task runner posts the completion
/// closure here rather than invoking it inline. The synchronization harness
/// implements this with its dedicated serial worker thread.
pub trait CompletionContext: Send + Sync {
    /// Enqueue work for execution on this context. Order of delivery must
    /// match order of posting.
    fn post(&self, work: Work);
}
