//! Batch envelopes: ordered descriptor groups executed as one wire exchange.

use std::time::Duration;

use crate::descriptor::CallDescriptor;
use crate::error::GraphError;

/// An ordered collection of [`CallDescriptor`]s plus batch-level settings.
///
/// Order is significant: results map back to descriptors by position. The
/// timeout, when set, bounds the full multi-descriptor exchange rather than
/// each sub-request individually.
#[derive(Debug, Clone, Default)]
pub struct BatchEnvelope {
    descriptors: Vec<CallDescriptor>,
    timeout: Option<Duration>,
    batch_app_id: Option<String>,
}

impl BatchEnvelope {
    #[must_use]
    pub fn new(descriptors: Vec<CallDescriptor>) -> Self {
        Self {
            descriptors,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn single(descriptor: CallDescriptor) -> Self {
        Self::new(vec![descriptor])
    }

    pub fn push(&mut self, descriptor: CallDescriptor) {
        self.descriptors.push(descriptor);
    }

    /// Bound the full exchange. `Duration` cannot express a negative value,
    /// so this path carries the non-negativity invariant in the type.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// Bound the full exchange with a raw millisecond value. Negative values
    /// are rejected here, at set time, never at execution time.
    pub fn set_timeout_millis(&mut self, millis: i64) -> Result<(), GraphError> {
        if millis < 0 {
            return Err(GraphError::usage(format!(
                "batch timeout must be non-negative, got {millis}ms"
            )));
        }
        #[allow(clippy::cast_sign_loss)]
        {
            self.timeout = Some(Duration::from_millis(millis as u64));
        }
        Ok(())
    }

    /// Shared application identity used when descriptors carry no access
    /// token of their own.
    pub fn set_batch_app_id(&mut self, app_id: impl Into<String>) {
        self.batch_app_id = Some(app_id.into());
    }

    #[must_use]
    pub fn descriptors(&self) -> &[CallDescriptor] {
        &self.descriptors
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn batch_app_id(&self) -> Option<&str> {
        self.batch_app_id.as_deref()
    }

    /// Submission-time check: an envelope must carry at least one descriptor.
    /// Signaled before any network activity occurs.
    pub fn validate_not_empty(&self) -> Result<(), GraphError> {
        if self.descriptors.is_empty() {
            return Err(GraphError::usage(
                "a batch envelope must contain at least one call descriptor",
            ));
        }
        Ok(())
    }
}

impl From<CallDescriptor> for BatchEnvelope {
    fn from(descriptor: CallDescriptor) -> Self {
        Self::single(descriptor)
    }
}

impl FromIterator<CallDescriptor> for BatchEnvelope {
    fn from_iter<T: IntoIterator<Item = CallDescriptor>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
