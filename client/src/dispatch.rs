//! The dispatcher: validate → encode → exchange → decode.

use std::time::Duration;

use graphwire_types::{
    BatchEnvelope, CallDescriptor, CallResult, ClientContext, GraphError, TransportErrorKind,
};

use crate::{decode, encode, http_client, shared_runtime};

/// Executes batch envelopes against a remote graph surface.
///
/// A dispatcher is a thin value over the shared HTTP client plus one
/// [`ClientContext`]; it is cheap to clone and has no mutable state. The
/// envelope is consumed read-only - no caller-visible identity persists
/// beyond the exchange.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    context: ClientContext,
    client: reqwest::Client,
}

impl Dispatcher {
    #[must_use]
    pub fn new(context: ClientContext) -> Self {
        Self {
            context,
            client: http_client().clone(),
        }
    }

    #[must_use]
    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    /// Build the wire request for an envelope without executing it.
    ///
    /// The returned request can be handed back to
    /// [`execute_request`](Self::execute_request) later; the envelope
    /// supplied for decoding must be the one encoded here.
    pub fn to_http_request(&self, envelope: &BatchEnvelope) -> Result<reqwest::Request, GraphError> {
        encode::to_http_request(&self.client, &self.context, envelope)
    }

    /// Execute an envelope: one wire exchange, results in descriptor order.
    ///
    /// Batch-level misuse (an empty envelope) is returned as `Err`
    /// synchronously, before any network activity. A descriptor-level
    /// conflict (graph path and rest method both set) fails every result in
    /// the envelope, since a batch is a single wire request that is withheld
    /// entirely. Transport and service failures arrive as error results,
    /// never as `Err`. Each descriptor's registered completion handler
    /// receives its own positional result before this returns.
    pub async fn execute(&self, envelope: &BatchEnvelope) -> Result<Vec<CallResult>, GraphError> {
        let results = self.dispatch(envelope).await?;
        notify_completions(envelope, &results);
        Ok(results)
    }

    /// The dispatch core: everything [`execute`](Self::execute) does except
    /// handler notification. The task runner drives handlers itself so a
    /// cancelled task can suppress them.
    pub(crate) async fn dispatch(
        &self,
        envelope: &BatchEnvelope,
    ) -> Result<Vec<CallResult>, GraphError> {
        envelope.validate_not_empty()?;

        for descriptor in envelope.descriptors() {
            if let Err(error) = descriptor.validate_target() {
                tracing::debug!(%error, "withholding batch: invalid descriptor");
                return Ok(all_failed(envelope.len(), &error));
            }
        }

        let request = match self.to_http_request(envelope) {
            Ok(request) => request,
            Err(error @ GraphError::Usage(_)) => return Err(error),
            Err(error) => return Ok(all_failed(envelope.len(), &error)),
        };

        Ok(self.exchange(request, envelope).await)
    }

    /// Execute a pre-built wire request, performing only the exchange and
    /// decode. The envelope must be the one the request was encoded from.
    pub async fn execute_request(
        &self,
        request: reqwest::Request,
        envelope: &BatchEnvelope,
    ) -> Result<Vec<CallResult>, GraphError> {
        envelope.validate_not_empty()?;
        let results = self.exchange(request, envelope).await;
        notify_completions(envelope, &results);
        Ok(results)
    }

    /// Single-descriptor sugar over [`execute`](Self::execute).
    pub async fn execute_call(&self, descriptor: CallDescriptor) -> CallResult {
        let envelope = BatchEnvelope::single(descriptor);
        match self.execute(&envelope).await {
            Ok(mut results) => results.remove(0),
            Err(error) => CallResult::failure(error),
        }
    }

    /// Blocking entry point for callers without an async context. Must not
    /// be called from inside a tokio runtime; that is a usage error, not a
    /// deadlock.
    pub fn execute_and_wait(
        &self,
        envelope: &BatchEnvelope,
    ) -> Result<Vec<CallResult>, GraphError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(GraphError::usage(
                "execute_and_wait called from async context; use execute().await",
            ));
        }
        shared_runtime().block_on(self.execute(envelope))
    }

    /// Blocking single-descriptor sugar.
    pub fn execute_call_and_wait(&self, descriptor: CallDescriptor) -> CallResult {
        if tokio::runtime::Handle::try_current().is_ok() {
            return CallResult::failure(GraphError::usage(
                "execute_call_and_wait called from async context; use execute_call().await",
            ));
        }
        shared_runtime().block_on(self.execute_call(descriptor))
    }

    /// Perform the exchange and decode, bounding the whole thing by the
    /// envelope timeout. On expiry every descriptor gets a timeout error
    /// result - a timed-out batch never partially succeeds.
    async fn exchange(&self, request: reqwest::Request, envelope: &BatchEnvelope) -> Vec<CallResult> {
        let count = envelope.len();
        match envelope.timeout() {
            Some(limit) => {
                match tokio::time::timeout(limit, self.exchange_inner(request, count)).await {
                    Ok(results) => results,
                    Err(_) => {
                        tracing::debug!(?limit, calls = count, "batch timed out");
                        all_failed_owned(count, timeout_error(limit))
                    }
                }
            }
            None => self.exchange_inner(request, count).await,
        }
    }

    async fn exchange_inner(&self, request: reqwest::Request, count: usize) -> Vec<CallResult> {
        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                let error = classify_reqwest_error(&e);
                tracing::debug!(%error, "wire exchange failed");
                return all_failed_owned(count, error);
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return all_failed_owned(
                    count,
                    GraphError::transport(
                        TransportErrorKind::Io,
                        format!("failed to read response body: {e}"),
                    ),
                );
            }
        };

        tracing::debug!(status, bytes = body.len(), calls = count, "decoding response");
        if count == 1 {
            vec![decode::decode_single_response(status, &body)]
        } else {
            decode::decode_batch_response(status, &body, count)
        }
    }
}

fn timeout_error(limit: Duration) -> GraphError {
    GraphError::timeout(format!("batch exchange exceeded {limit:?}"))
}

fn classify_reqwest_error(e: &reqwest::Error) -> GraphError {
    let kind = if e.is_connect() {
        TransportErrorKind::Connect
    } else if e.is_timeout() {
        TransportErrorKind::Timeout
    } else {
        TransportErrorKind::Io
    };
    GraphError::transport(kind, e.to_string())
}

/// Hand each descriptor's positional result to its completion handler, when
/// one was registered. Error results are delivered like any other.
fn notify_completions(envelope: &BatchEnvelope, results: &[CallResult]) {
    for (descriptor, result) in envelope.descriptors().iter().zip(results) {
        if let Some(handler) = descriptor.completion() {
            handler.invoke(result.clone());
        }
    }
}

fn all_failed(count: usize, error: &GraphError) -> Vec<CallResult> {
    (0..count)
        .map(|_| CallResult::failure(error.clone()))
        .collect()
}

fn all_failed_owned(count: usize, error: GraphError) -> Vec<CallResult> {
    all_failed(count, &error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(ClientContext::new("http://localhost:9").unwrap())
    }

    #[tokio::test]
    async fn empty_envelope_is_synchronous_usage_error() {
        let err = dispatcher()
            .execute(&BatchEnvelope::default())
            .await
            .unwrap_err();
        assert!(err.is_usage());
    }

    #[tokio::test]
    async fn conflicting_descriptor_fails_all_results() {
        let mut bad = CallDescriptor::new();
        bad.set_graph_path("me");
        bad.set_rest_method("users.getInfo");
        let envelope: BatchEnvelope = [CallDescriptor::read("me"), bad].into_iter().collect();

        let results = dispatcher().execute(&envelope).await.unwrap();
        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(result.error().unwrap().is_usage());
        }
    }

    #[tokio::test]
    async fn connection_failure_yields_transport_results() {
        // Port 9 (discard) is not listening; the connect fails fast.
        let results = dispatcher()
            .execute(&BatchEnvelope::single(CallDescriptor::read("me")))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].error().unwrap().is_transport());
    }

    #[tokio::test]
    async fn completion_handler_receives_error_results_too() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let fired = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&fired);
        let descriptor = CallDescriptor::read("me").with_completion(move |result| {
            assert!(result.error().unwrap().is_transport());
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let results = dispatcher()
            .execute(&BatchEnvelope::single(descriptor))
            .await
            .unwrap();
        assert!(results[0].error().unwrap().is_transport());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blocking_entry_from_async_context_is_usage_error() {
        let err = dispatcher()
            .execute_and_wait(&BatchEnvelope::single(CallDescriptor::read("me")))
            .unwrap_err();
        assert!(err.is_usage());
    }
}
