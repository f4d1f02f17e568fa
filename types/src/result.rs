//! Decoded per-call outcomes.

use serde_json::Value;

use crate::error::GraphError;

/// Decoded payload of one successful call: a single structured object or a
/// homogeneous ordered list.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Object(Value),
    List(Vec<Value>),
}

impl Payload {
    #[must_use]
    pub fn as_object(&self) -> Option<&Value> {
        match self {
            Self::Object(value) => Some(value),
            Self::List(_) => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(values) => Some(values),
            Self::Object(_) => None,
        }
    }
}

/// The decoded outcome of one [`CallDescriptor`](crate::CallDescriptor).
///
/// Exactly one of payload and error is meaningful. The accessors keep the two
/// mutually exclusive and always checkable: a caller who never inspects
/// [`error`](Self::error) simply observes an absent payload.
#[derive(Debug, Clone)]
pub struct CallResult {
    outcome: Result<Option<Payload>, GraphError>,
}

impl CallResult {
    #[must_use]
    pub fn success(payload: Payload) -> Self {
        Self {
            outcome: Ok(Some(payload)),
        }
    }

    /// A successful exchange that decoded to no payload (e.g. an empty body).
    #[must_use]
    pub fn empty() -> Self {
        Self { outcome: Ok(None) }
    }

    #[must_use]
    pub fn failure(error: GraphError) -> Self {
        Self {
            outcome: Err(error),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The structured payload, when the call succeeded with a single object.
    #[must_use]
    pub fn object(&self) -> Option<&Value> {
        self.payload().and_then(Payload::as_object)
    }

    /// The list payload, when the call succeeded with a homogeneous list.
    #[must_use]
    pub fn object_list(&self) -> Option<&[Value]> {
        self.payload().and_then(Payload::as_list)
    }

    #[must_use]
    pub fn payload(&self) -> Option<&Payload> {
        self.outcome.as_ref().ok().and_then(Option::as_ref)
    }

    #[must_use]
    pub fn error(&self) -> Option<&GraphError> {
        self.outcome.as_ref().err()
    }

    /// Consume the result, yielding the payload or the error.
    pub fn into_outcome(self) -> Result<Option<Payload>, GraphError> {
        self.outcome
    }
}
