//! Core domain types for graphwire.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the SDK.
//!
//! The central types follow the request lifecycle:
//!
//! - [`CallDescriptor`] - one remote operation before execution
//! - [`BatchEnvelope`] - an ordered group of descriptors executed as one wire
//!   exchange
//! - [`CallResult`] - the decoded outcome (payload or error) of one descriptor
//! - [`GraphError`] - the error taxonomy shared by every layer
//! - [`ClientContext`] - explicit configuration passed to the dispatcher and
//!   encoder instead of process-wide mutable state

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod batch;
mod context;
mod descriptor;
mod error;
mod executor;
mod result;

pub use batch::BatchEnvelope;
pub use context::{
    ClientContext, ContextError, ACCESS_TOKEN_ENV_VAR, APP_ID_ENV_VAR, DEFAULT_SDK_MARKER,
};
pub use descriptor::{
    parse_result_ref, result_ref, Attachment, CallDescriptor, HttpMethod, ResultRef,
};
pub use error::{GraphError, TransportErrorKind, UNKNOWN_ERROR_CODE};
pub use executor::{CompletionContext, CompletionHandler, Work};
pub use result::{CallResult, Payload};
