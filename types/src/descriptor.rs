//! Call descriptors: one logical remote operation before execution.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GraphError;
use crate::executor::CompletionHandler;
use crate::result::CallResult;

/// HTTP method for a call. Graph reads default to GET.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    #[default]
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
    #[serde(rename = "DELETE")]
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

/// A binary payload attached to a call (uploaded as a multipart file part).
///
/// This is the seam for the externally-owned image capability: anything that
/// can hand over encoded bytes plus a mime type becomes transportable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

impl Attachment {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            file_name: file_name.into(),
        }
    }

    pub fn png(bytes: Vec<u8>) -> Self {
        Self::new(bytes, "image/png", "file.png")
    }

    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self::new(bytes, "image/jpeg", "file.jpg")
    }
}

/// A parsed `{result=<name>:<json-path>}` cross-reference token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRef {
    pub name: String,
    pub json_path: String,
}

/// Build the opaque placeholder that makes one batch entry's parameter depend
/// on another named entry's result, e.g. `{result=first:$.id}`.
///
/// The token is resolved server-side; the SDK only constructs and recognizes
/// it, never evaluates the embedded path expression.
#[must_use]
pub fn result_ref(name: &str, json_path: &str) -> String {
    format!("{{result={name}:{json_path}}}")
}

/// Parse a `{result=<name>:<json-path>}` token. Returns `None` when the value
/// is not a well-formed cross-reference.
#[must_use]
pub fn parse_result_ref(value: &str) -> Option<ResultRef> {
    let inner = value.strip_prefix("{result=")?.strip_suffix('}')?;
    let (name, json_path) = inner.split_once(':')?;
    if name.is_empty() || json_path.is_empty() {
        return None;
    }
    Some(ResultRef {
        name: name.to_string(),
        json_path: json_path.to_string(),
    })
}

/// An immutable-once-submitted description of one remote operation.
///
/// A descriptor is a mutable sketch until it is submitted for execution: the
/// setters may be called freely, and conflicting configuration (a graph path
/// and a legacy method on the same descriptor) is only rejected at
/// submission time, when the encoder builds the wire request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallDescriptor {
    method: HttpMethod,
    graph_path: Option<String>,
    rest_method: Option<String>,
    params: Map<String, Value>,
    graph_object: Option<Value>,
    attachment: Option<Attachment>,
    batch_entry_name: Option<String>,
    access_token: Option<String>,
    on_completed: Option<CompletionHandler>,
}

impl CallDescriptor {
    /// An empty GET descriptor, configured through the setters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A GET against a graph path (`"me"`, `"search"`, an object id, ...).
    pub fn read(graph_path: impl Into<String>) -> Self {
        Self {
            graph_path: Some(graph_path.into()),
            ..Self::default()
        }
    }

    /// A POST of a structured payload to a graph path.
    pub fn write(graph_path: impl Into<String>, graph_object: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            graph_path: Some(graph_path.into()),
            graph_object: Some(graph_object),
            ..Self::default()
        }
    }

    /// A legacy named-method call (pre-graph REST surface).
    pub fn rest(rest_method: impl Into<String>) -> Self {
        Self {
            rest_method: Some(rest_method.into()),
            ..Self::default()
        }
    }

    /// A POST of a binary attachment to a graph path.
    pub fn upload(graph_path: impl Into<String>, attachment: Attachment) -> Self {
        Self {
            method: HttpMethod::Post,
            graph_path: Some(graph_path.into()),
            attachment: Some(attachment),
            ..Self::default()
        }
    }

    // Setters (valid until submission)

    pub fn set_method(&mut self, method: HttpMethod) {
        self.method = method;
    }

    pub fn set_graph_path(&mut self, graph_path: impl Into<String>) {
        self.graph_path = Some(graph_path.into());
    }

    pub fn set_rest_method(&mut self, rest_method: impl Into<String>) {
        self.rest_method = Some(rest_method.into());
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn set_graph_object(&mut self, graph_object: Value) {
        self.graph_object = Some(graph_object);
    }

    pub fn set_attachment(&mut self, attachment: Attachment) {
        self.attachment = Some(attachment);
    }

    /// Name this entry so siblings in the same batch can reference its result
    /// via [`result_ref`].
    pub fn set_batch_entry_name(&mut self, name: impl Into<String>) {
        self.batch_entry_name = Some(name.into());
    }

    /// Per-call identity override; falls back to the envelope's shared
    /// identity, then the client context.
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = Some(token.into());
    }

    /// Register a closure to receive this call's own result once the
    /// envelope has been executed, successful or not. Invoked at most once.
    pub fn set_completion(&mut self, on_completed: impl FnOnce(CallResult) + Send + 'static) {
        self.on_completed = Some(CompletionHandler::new(on_completed));
    }

    // Builder-style variants for call-site chaining

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_param(key, value);
        self
    }

    #[must_use]
    pub fn with_batch_entry_name(mut self, name: impl Into<String>) -> Self {
        self.set_batch_entry_name(name);
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_completion(
        mut self,
        on_completed: impl FnOnce(CallResult) + Send + 'static,
    ) -> Self {
        self.set_completion(on_completed);
        self
    }

    // Accessors

    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    #[must_use]
    pub fn graph_path(&self) -> Option<&str> {
        self.graph_path.as_deref()
    }

    #[must_use]
    pub fn rest_method(&self) -> Option<&str> {
        self.rest_method.as_deref()
    }

    #[must_use]
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    #[must_use]
    pub fn graph_object(&self) -> Option<&Value> {
        self.graph_object.as_ref()
    }

    #[must_use]
    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    #[must_use]
    pub fn batch_entry_name(&self) -> Option<&str> {
        self.batch_entry_name.as_deref()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    #[must_use]
    pub fn completion(&self) -> Option<&CompletionHandler> {
        self.on_completed.as_ref()
    }

    /// Submission-time validation: a descriptor must target either a graph
    /// path or a legacy method, never both.
    pub fn validate_target(&self) -> Result<(), GraphError> {
        if self.graph_path.is_some() && self.rest_method.is_some() {
            return Err(GraphError::usage(
                "a call descriptor may set a graph path or a rest method, not both",
            ));
        }
        Ok(())
    }

    /// The relative target used on the wire: the graph path, or the legacy
    /// method routed through the REST surface.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.graph_path.as_deref().or(self.rest_method.as_deref())
    }
}
