//! One-shot asynchronous execution of a dispatch with cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::{AbortHandle, Abortable};
use graphwire_types::{
    BatchEnvelope, CallResult, CompletionContext, CompletionHandler, GraphError,
};
use uuid::Uuid;

use crate::{shared_runtime, Dispatcher};

/// Lifecycle of a [`RequestTask`].
///
/// `Idle → Running → {Completed, Cancelled, Failed}`. Only one execution is
/// permitted per task; re-invoking is a usage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

struct TaskShared {
    state: Mutex<TaskState>,
    cancelled: AtomicBool,
    error: Mutex<Option<GraphError>>,
}

/// Runs one dispatch off the caller's control thread and correlates the
/// ordered results back to a completion closure.
///
/// Cancellation is cooperative: once the exchange has been sent it cannot be
/// un-sent, but a cancelled task is guaranteed never to invoke its
/// completion closure, and its connection is released with the aborted
/// future. Callers replacing in-flight work should start the new task,
/// cancel the previous one, and ignore any late effects by comparing
/// [`id`](Self::id)s ("fire may still land").
pub struct RequestTask {
    id: Uuid,
    dispatcher: Dispatcher,
    envelope: Mutex<Option<BatchEnvelope>>,
    shared: Arc<TaskShared>,
    abort: Mutex<Option<AbortHandle>>,
}

impl RequestTask {
    #[must_use]
    pub fn new(dispatcher: Dispatcher, envelope: BatchEnvelope) -> Self {
        Self {
            id: Uuid::new_v4(),
            dispatcher,
            envelope: Mutex::new(Some(envelope)),
            shared: Arc::new(TaskShared {
                state: Mutex::new(TaskState::Idle),
                cancelled: AtomicBool::new(false),
                error: Mutex::new(None),
            }),
            abort: Mutex::new(None),
        }
    }

    /// Stable identity for the superseding-request idiom.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        *self.shared.state.lock().expect("task state lock poisoned")
    }

    /// The batch-level error when the task [`Failed`](TaskState::Failed).
    #[must_use]
    pub fn error(&self) -> Option<GraphError> {
        self.shared
            .error
            .lock()
            .expect("task error lock poisoned")
            .clone()
    }

    /// Start execution, delivering the ordered results to `on_completed` on
    /// whichever worker ran the exchange.
    pub fn execute<F>(&self, on_completed: F) -> Result<(), GraphError>
    where
        F: FnOnce(Vec<CallResult>) + Send + 'static,
    {
        self.execute_inner(None, on_completed)
    }

    /// Start execution, delivering the completion through `context` so the
    /// owning execution context observes it (e.g. a synchronization
    /// harness's serial worker).
    pub fn execute_on<F>(
        &self,
        context: Arc<dyn CompletionContext>,
        on_completed: F,
    ) -> Result<(), GraphError>
    where
        F: FnOnce(Vec<CallResult>) + Send + 'static,
    {
        self.execute_inner(Some(context), on_completed)
    }

    fn execute_inner<F>(
        &self,
        context: Option<Arc<dyn CompletionContext>>,
        on_completed: F,
    ) -> Result<(), GraphError>
    where
        F: FnOnce(Vec<CallResult>) + Send + 'static,
    {
        let envelope = {
            let mut state = self.shared.state.lock().expect("task state lock poisoned");
            if *state != TaskState::Idle {
                return Err(GraphError::usage(format!(
                    "request task already executed (state: {state:?})"
                )));
            }
            let mut slot = self.envelope.lock().expect("task envelope lock poisoned");
            // Batch-level misuse stays synchronous: an empty envelope never
            // reaches the worker.
            if let Some(envelope) = slot.as_ref() {
                envelope.validate_not_empty()?;
            }
            let envelope = slot
                .take()
                .ok_or_else(|| GraphError::usage("request task already executed"))?;
            *state = TaskState::Running;
            envelope
        };

        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        *self.abort.lock().expect("task abort lock poisoned") = Some(abort_handle);

        let dispatcher = self.dispatcher.clone();
        let shared = Arc::clone(&self.shared);
        let task_id = self.id;

        let work = Abortable::new(
            async move {
                let outcome = dispatcher.dispatch(&envelope).await;
                // Handler notification is deferred to delivery so a cancel
                // that lands first suppresses per-call handlers as well.
                let handlers: Vec<Option<CompletionHandler>> = envelope
                    .descriptors()
                    .iter()
                    .map(|descriptor| descriptor.completion().cloned())
                    .collect();
                deliver(&shared, task_id, context, handlers, on_completed, outcome);
            },
            abort_registration,
        );

        let future = async move {
            if work.await.is_err() {
                tracing::debug!(%task_id, "request task aborted");
            }
        };

        // Completion is observed through the callback, not the join handle.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => drop(handle.spawn(future)),
            Err(_) => drop(shared_runtime().spawn(future)),
        }
        Ok(())
    }

    /// Request cancellation. Idempotent; quietly does nothing once the task
    /// has already completed or failed.
    pub fn cancel(&self) {
        {
            // The state mutex serializes this against result delivery, so a
            // cancel that lands first is guaranteed to suppress the callback.
            let mut state = self.shared.state.lock().expect("task state lock poisoned");
            if matches!(*state, TaskState::Idle | TaskState::Running) {
                *state = TaskState::Cancelled;
            }
            self.shared.cancelled.store(true, Ordering::SeqCst);
        }
        if let Some(handle) = self.abort.lock().expect("task abort lock poisoned").take() {
            handle.abort();
        }
    }
}

fn deliver<F>(
    shared: &Arc<TaskShared>,
    task_id: Uuid,
    context: Option<Arc<dyn CompletionContext>>,
    handlers: Vec<Option<CompletionHandler>>,
    on_completed: F,
    outcome: Result<Vec<CallResult>, GraphError>,
) where
    F: FnOnce(Vec<CallResult>) + Send + 'static,
{
    let results = {
        let mut state = shared.state.lock().expect("task state lock poisoned");
        if *state == TaskState::Cancelled || shared.cancelled.load(Ordering::SeqCst) {
            tracing::warn!(%task_id, "suppressing completion of cancelled task");
            return;
        }
        match outcome {
            Ok(results) => {
                *state = TaskState::Completed;
                results
            }
            Err(error) => {
                tracing::debug!(%task_id, %error, "request task failed");
                *shared.error.lock().expect("task error lock poisoned") = Some(error);
                *state = TaskState::Failed;
                return;
            }
        }
    };

    match context {
        Some(context) => {
            // Cancellation may land between this post and the context
            // draining its queue; re-check at delivery.
            let shared = Arc::clone(shared);
            context.post(Box::new(move || {
                if shared.cancelled.load(Ordering::SeqCst) {
                    tracing::warn!(%task_id, "suppressing posted completion of cancelled task");
                    return;
                }
                notify_handlers(handlers, &results);
                on_completed(results);
            }));
        }
        None => {
            notify_handlers(handlers, &results);
            on_completed(results);
        }
    }
}

/// Hand each registered per-call handler its own positional result.
fn notify_handlers(handlers: Vec<Option<CompletionHandler>>, results: &[CallResult]) {
    for (handler, result) in handlers.into_iter().zip(results) {
        if let Some(handler) = handler {
            handler.invoke(result.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphwire_types::{CallDescriptor, ClientContext};

    fn task() -> RequestTask {
        let dispatcher = Dispatcher::new(ClientContext::new("http://localhost:9").unwrap());
        RequestTask::new(
            dispatcher,
            BatchEnvelope::single(CallDescriptor::read("me")),
        )
    }

    #[test]
    fn new_task_is_idle_with_distinct_identity() {
        let a = task();
        let b = task();
        assert_eq!(a.state(), TaskState::Idle);
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn double_execute_is_usage_error() {
        let task = task();
        task.execute(|_| {}).unwrap();
        let err = task.execute(|_| {}).unwrap_err();
        assert!(err.is_usage());
    }

    #[tokio::test]
    async fn cancelled_idle_task_cannot_execute() {
        let task = task();
        task.cancel();
        assert_eq!(task.state(), TaskState::Cancelled);
        let err = task.execute(|_| {}).unwrap_err();
        assert!(err.is_usage());
    }
}
