//! Batching request engine for graph-style APIs.
//!
//! # Architecture
//!
//! The crate is organized around the request lifecycle:
//!
//! - [`encode`] - turns a [`BatchEnvelope`] into one wire request (single
//!   call or batched POST)
//! - [`decode`] - turns a wire response back into ordered per-call
//!   [`CallResult`]s
//! - [`Dispatcher`] - performs encode → exchange → decode, synchronously or
//!   from async code, with whole-batch timeout handling
//! - [`RequestTask`] - runs one dispatch on a worker task with cancellation
//!   and a completion closure
//!
//! # Ordering
//!
//! Within one envelope, results always come back in descriptor order, no
//! matter how the remote side interleaves sub-requests.
//!
//! # Error Handling
//!
//! Misuse (empty batch, negative timeout, double-execute) is signaled
//! synchronously as [`GraphError::Usage`]. Wire-level and service-level
//! failures are delivered as error results to completion handlers; they never
//! abort sibling results within the same batch.

pub mod decode;
pub mod encode;

mod dispatch;
mod task;

pub use dispatch::Dispatcher;
pub use task::{RequestTask, TaskState};

pub use graphwire_types::{
    result_ref, Attachment, BatchEnvelope, CallDescriptor, CallResult, ClientContext,
    CompletionContext, CompletionHandler, GraphError, HttpMethod, Payload, TransportErrorKind,
};

use std::sync::OnceLock;
use std::time::Duration;

const CONNECT_TIMEOUT_SECS: u64 = 30;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// Process-wide HTTP client shared by all dispatchers.
///
/// Built once with hardened defaults; a dispatcher never owns its own
/// connection pool.
pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        base_client_builder().build().unwrap_or_else(|e| {
            tracing::error!("failed to build hardened HTTP client: {e}, falling back to minimal");
            reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .expect("minimal HTTP client must build")
        })
    })
}

fn base_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
}

/// Shared runtime backing the blocking entry points and spawned tasks when
/// the caller is not already inside a tokio runtime.
pub(crate) fn shared_runtime() -> &'static tokio::runtime::Runtime {
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .thread_name("graphwire-io")
            .build()
            .expect("dispatcher runtime must build")
    })
}
