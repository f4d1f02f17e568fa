//! Client configuration passed explicitly to the dispatcher and encoder.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Environment variable consulted by [`ClientContext::from_env`] for the
/// shared access token.
pub const ACCESS_TOKEN_ENV_VAR: &str = "GRAPHWIRE_ACCESS_TOKEN";
/// Environment variable consulted by [`ClientContext::from_env`] for the
/// application id.
pub const APP_ID_ENV_VAR: &str = "GRAPHWIRE_APP_ID";

/// Marker sent as the `sdk` query parameter and User-Agent prefix on every
/// wire request.
pub const DEFAULT_SDK_MARKER: &str = "graphwire";

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("invalid base url {url:?}: {source}")]
    InvalidBaseUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("base url must use http or https, got {0:?}")]
    UnsupportedScheme(String),
}

/// Explicit configuration for one client: endpoints, identity, markers.
///
/// A context is a plain value handed to the dispatcher and encoder at call
/// time. There is no process-wide identity or credential state; callers that
/// want a shared context clone it or wrap it in an `Arc` themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientContext {
    graph_base_url: Url,
    rest_base_url: Url,
    app_id: Option<String>,
    access_token: Option<String>,
    sdk_marker: String,
    user_agent: String,
}

impl ClientContext {
    /// Build a context from a graph base URL. The legacy REST surface
    /// defaults to `<base>/method/` alongside the graph endpoint.
    pub fn new(graph_base_url: &str) -> Result<Self, ContextError> {
        let graph = parse_base(graph_base_url)?;
        let rest = parse_base(&format!("{}method/", ensure_trailing_slash(graph_base_url)))?;
        Ok(Self {
            graph_base_url: graph,
            rest_base_url: rest,
            app_id: None,
            access_token: None,
            sdk_marker: DEFAULT_SDK_MARKER.to_string(),
            user_agent: format!("{DEFAULT_SDK_MARKER}-sdk/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    /// Like [`new`](Self::new), additionally picking up identity from
    /// `GRAPHWIRE_ACCESS_TOKEN` / `GRAPHWIRE_APP_ID` when set.
    pub fn from_env(graph_base_url: &str) -> Result<Self, ContextError> {
        let mut context = Self::new(graph_base_url)?;
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV_VAR)
            && !token.trim().is_empty()
        {
            context.access_token = Some(token);
        }
        if let Ok(app_id) = std::env::var(APP_ID_ENV_VAR)
            && !app_id.trim().is_empty()
        {
            context.app_id = Some(app_id);
        }
        Ok(context)
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    #[must_use]
    pub fn with_sdk_marker(mut self, marker: impl Into<String>) -> Self {
        self.sdk_marker = marker.into();
        self
    }

    /// Override the legacy REST base URL when it does not live under the
    /// graph endpoint.
    pub fn with_rest_base_url(mut self, rest_base_url: &str) -> Result<Self, ContextError> {
        self.rest_base_url = parse_base(rest_base_url)?;
        Ok(self)
    }

    #[must_use]
    pub fn graph_base_url(&self) -> &Url {
        &self.graph_base_url
    }

    #[must_use]
    pub fn rest_base_url(&self) -> &Url {
        &self.rest_base_url
    }

    #[must_use]
    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    #[must_use]
    pub fn sdk_marker(&self) -> &str {
        &self.sdk_marker
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

fn ensure_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

fn parse_base(url: &str) -> Result<Url, ContextError> {
    let with_slash = ensure_trailing_slash(url);
    let parsed = Url::parse(&with_slash).map_err(|source| ContextError::InvalidBaseUrl {
        url: url.to_string(),
        source,
    })?;
    // A trailing slash keeps Url::join from swallowing the last path segment.
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ContextError::UnsupportedScheme(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_normalizes_base_urls() {
        let context = ClientContext::new("https://graph.example.com").unwrap();
        assert_eq!(context.graph_base_url().as_str(), "https://graph.example.com/");
        assert_eq!(
            context.rest_base_url().as_str(),
            "https://graph.example.com/method/"
        );
    }

    #[test]
    fn rejects_non_http_schemes() {
        let err = ClientContext::new("ftp://graph.example.com").unwrap_err();
        assert!(matches!(err, ContextError::UnsupportedScheme(_)));
    }

    #[test]
    fn rejects_unparseable_urls() {
        let err = ClientContext::new("not a url").unwrap_err();
        assert!(matches!(err, ContextError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn identity_is_plain_value_state() {
        let context = ClientContext::new("http://localhost:1234")
            .unwrap()
            .with_app_id("12345")
            .with_access_token("token-abc");
        assert_eq!(context.app_id(), Some("12345"));
        assert_eq!(context.access_token(), Some("token-abc"));
    }
}
