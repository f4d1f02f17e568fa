//! Transport encoding: [`BatchEnvelope`] → one wire request.
//!
//! A single-descriptor envelope becomes one plain request against the graph
//! (or legacy REST) surface. A multi-descriptor envelope becomes ONE POST
//! whose `batch` form field is an ordered JSON array of sub-requests; the
//! server fans them out and returns sub-responses in the same order.
//!
//! Every outer request carries the client-identification markers: an `sdk`
//! query parameter, `format=json`, and a User-Agent starting with the SDK
//! marker.

use reqwest::multipart::{Form, Part};
use serde_json::{Map, Value};
use url::Url;

use graphwire_types::{
    Attachment, BatchEnvelope, CallDescriptor, ClientContext, GraphError, HttpMethod,
    TransportErrorKind,
};

/// Response-format marker sent on every request.
pub const FORMAT_PARAM: (&str, &str) = ("format", "json");
/// Query parameter carrying the SDK marker.
pub const SDK_PARAM_KEY: &str = "sdk";
/// Form field carrying the ordered batch array.
pub const BATCH_PARAM_KEY: &str = "batch";
/// Form field carrying the shared application identity for a batch.
pub const BATCH_APP_ID_KEY: &str = "batch_app_id";
/// Parameter carrying a caller identity token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Validate an envelope for submission: non-empty, and every descriptor
/// targets a graph path or a legacy method, never both.
///
/// An empty envelope is a synchronous usage error; a descriptor-level
/// conflict is reported per descriptor by the dispatcher (the whole exchange
/// is withheld either way, since a batch is one wire request).
pub fn validate_envelope(envelope: &BatchEnvelope) -> Result<(), GraphError> {
    envelope.validate_not_empty()?;
    for descriptor in envelope.descriptors() {
        descriptor.validate_target()?;
    }
    Ok(())
}

/// Build the one wire request for an envelope.
///
/// Callers may hold on to the returned request and hand it back to the
/// dispatcher later (the pre-built connection path); the descriptor set used
/// for decoding must match the one encoded here.
pub fn to_http_request(
    client: &reqwest::Client,
    context: &ClientContext,
    envelope: &BatchEnvelope,
) -> Result<reqwest::Request, GraphError> {
    validate_envelope(envelope)?;
    let descriptors = envelope.descriptors();
    if descriptors.len() == 1 {
        single_request(client, context, envelope, &descriptors[0])
    } else {
        batch_request(client, context, envelope)
    }
}

fn single_request(
    client: &reqwest::Client,
    context: &ClientContext,
    envelope: &BatchEnvelope,
    descriptor: &CallDescriptor,
) -> Result<reqwest::Request, GraphError> {
    let base = if descriptor.rest_method().is_some() {
        context.rest_base_url()
    } else {
        context.graph_base_url()
    };
    let target = descriptor.target().unwrap_or("");
    let mut url = join_target(base, target)?;
    append_marker_params(&mut url, context);

    let mut params = flat_params(descriptor);
    if let Some(token) = identity_param(context, envelope, descriptor) {
        params.push(token);
    }

    tracing::debug!(
        method = descriptor.method().as_str(),
        target,
        params = params.len(),
        "encoding single call"
    );

    let builder = match descriptor.method() {
        HttpMethod::Get | HttpMethod::Delete => {
            for (key, value) in &params {
                url.query_pairs_mut().append_pair(key, value);
            }
            let method = if descriptor.method() == HttpMethod::Get {
                reqwest::Method::GET
            } else {
                reqwest::Method::DELETE
            };
            client.request(method, url)
        }
        HttpMethod::Post => {
            if let Some(attachment) = descriptor.attachment() {
                let mut form = Form::new();
                for (key, value) in params {
                    form = form.text(key, value);
                }
                let part = Part::bytes(attachment.bytes.clone())
                    .file_name(attachment.file_name.clone())
                    .mime_str(&attachment.mime_type)
                    .map_err(|e| {
                        GraphError::usage(format!(
                            "invalid attachment mime type {:?}: {e}",
                            attachment.mime_type
                        ))
                    })?;
                form = form.part("source", part);
                client.post(url).multipart(form)
            } else {
                client.post(url).form(&params)
            }
        }
    };

    builder
        .header(reqwest::header::USER_AGENT, context.user_agent())
        .build()
        .map_err(|e| {
            GraphError::transport(TransportErrorKind::Io, format!("request build failed: {e}"))
        })
}

fn batch_request(
    client: &reqwest::Client,
    context: &ClientContext,
    envelope: &BatchEnvelope,
) -> Result<reqwest::Request, GraphError> {
    let mut url = context.graph_base_url().clone();
    append_marker_params(&mut url, context);

    let mut attachments: Vec<(String, &Attachment)> = Vec::new();
    let entries: Vec<Value> = envelope
        .descriptors()
        .iter()
        .enumerate()
        .map(|(index, descriptor)| batch_entry(descriptor, index, &mut attachments))
        .collect();
    let batch_json = Value::Array(entries).to_string();

    let mut fields: Vec<(String, String)> = vec![(BATCH_PARAM_KEY.to_string(), batch_json)];
    match shared_identity(context, envelope) {
        SharedIdentity::Token(token) => fields.push((ACCESS_TOKEN_KEY.to_string(), token)),
        SharedIdentity::AppId(app_id) => fields.push((BATCH_APP_ID_KEY.to_string(), app_id)),
        SharedIdentity::None => {}
    }

    tracing::debug!(
        calls = envelope.len(),
        attachments = attachments.len(),
        "encoding batch"
    );

    let builder = if attachments.is_empty() {
        client.post(url).form(&fields)
    } else {
        let mut form = Form::new();
        for (key, value) in fields {
            form = form.text(key, value);
        }
        for (part_name, attachment) in attachments {
            let part = Part::bytes(attachment.bytes.clone())
                .file_name(attachment.file_name.clone())
                .mime_str(&attachment.mime_type)
                .map_err(|e| {
                    GraphError::usage(format!(
                        "invalid attachment mime type {:?}: {e}",
                        attachment.mime_type
                    ))
                })?;
            form = form.part(part_name, part);
        }
        client.post(url).multipart(form)
    };

    builder
        .header(reqwest::header::USER_AGENT, context.user_agent())
        .build()
        .map_err(|e| {
            GraphError::transport(TransportErrorKind::Io, format!("request build failed: {e}"))
        })
}

/// One entry of the ordered `batch` array:
/// `{method, relative_url, name?, body?, attached_files?}`.
fn batch_entry<'a>(
    descriptor: &'a CallDescriptor,
    index: usize,
    attachments: &mut Vec<(String, &'a Attachment)>,
) -> Value {
    let mut entry = Map::new();
    entry.insert(
        "method".to_string(),
        Value::String(descriptor.method().as_str().to_string()),
    );

    let target = if let Some(method) = descriptor.rest_method() {
        format!("method/{method}")
    } else {
        descriptor.graph_path().unwrap_or("").to_string()
    };

    let mut params = flat_params_without_object(descriptor);
    if let Some(token) = descriptor.access_token() {
        params.push((ACCESS_TOKEN_KEY.to_string(), token.to_string()));
    }
    let relative_url = match descriptor.method() {
        HttpMethod::Get | HttpMethod::Delete => append_query(&target, &params),
        HttpMethod::Post => {
            // POST parameters and the payload object travel in the entry body.
            let mut body_params = params;
            body_params.extend(object_params(descriptor));
            if !body_params.is_empty() {
                entry.insert(
                    "body".to_string(),
                    Value::String(encode_form(&body_params)),
                );
            }
            target
        }
    };
    entry.insert("relative_url".to_string(), Value::String(relative_url));

    if let Some(name) = descriptor.batch_entry_name() {
        entry.insert("name".to_string(), Value::String(name.to_string()));
    }

    if let Some(attachment) = descriptor.attachment() {
        let part_name = format!("file{index}");
        entry.insert(
            "attached_files".to_string(),
            Value::String(part_name.clone()),
        );
        attachments.push((part_name, attachment));
    }

    entry.into()
}

enum SharedIdentity {
    Token(String),
    AppId(String),
    None,
}

/// Identity for the outer batch request, used when descriptors don't each
/// carry their own: context token, else envelope app id, else context app id.
fn shared_identity(context: &ClientContext, envelope: &BatchEnvelope) -> SharedIdentity {
    if let Some(token) = context.access_token() {
        return SharedIdentity::Token(token.to_string());
    }
    if let Some(app_id) = envelope.batch_app_id().or(context.app_id()) {
        return SharedIdentity::AppId(app_id.to_string());
    }
    SharedIdentity::None
}

fn identity_param(
    context: &ClientContext,
    envelope: &BatchEnvelope,
    descriptor: &CallDescriptor,
) -> Option<(String, String)> {
    if let Some(token) = descriptor.access_token().or(context.access_token()) {
        return Some((ACCESS_TOKEN_KEY.to_string(), token.to_string()));
    }
    envelope
        .batch_app_id()
        .or(context.app_id())
        .map(|app_id| (BATCH_APP_ID_KEY.to_string(), app_id.to_string()))
}

fn append_marker_params(url: &mut Url, context: &ClientContext) {
    url.query_pairs_mut()
        .append_pair(SDK_PARAM_KEY, context.sdk_marker())
        .append_pair(FORMAT_PARAM.0, FORMAT_PARAM.1);
}

fn join_target(base: &Url, target: &str) -> Result<Url, GraphError> {
    // Leading slashes would escape the base path.
    let relative = target.trim_start_matches('/');
    base.join(relative)
        .map_err(|e| GraphError::usage(format!("invalid call target {target:?}: {e}")))
}

/// Flatten the descriptor's parameter set (and per-call identity) to wire
/// strings. Cross-reference tokens pass through verbatim.
fn flat_params(descriptor: &CallDescriptor) -> Vec<(String, String)> {
    let mut params = flat_params_without_object(descriptor);
    if descriptor.method() == HttpMethod::Post {
        params.extend(object_params(descriptor));
    }
    if let Some(token) = descriptor.access_token() {
        params.push((ACCESS_TOKEN_KEY.to_string(), token.to_string()));
    }
    params
}

fn flat_params_without_object(descriptor: &CallDescriptor) -> Vec<(String, String)> {
    descriptor
        .params()
        .iter()
        .map(|(key, value)| (key.clone(), value_to_param(value)))
        .collect()
}

/// A write's payload object is flattened into form fields alongside the
/// explicit parameters.
fn object_params(descriptor: &CallDescriptor) -> Vec<(String, String)> {
    match descriptor.graph_object() {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| (key.clone(), value_to_param(value)))
            .collect(),
        Some(other) => vec![("object".to_string(), value_to_param(other))],
        None => Vec::new(),
    }
}

fn value_to_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn encode_form(params: &[(String, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

fn append_query(target: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return target.to_string();
    }
    let query = encode_form(params);
    if target.contains('?') {
        format!("{target}&{query}")
    } else {
        format!("{target}?{query}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphwire_types::result_ref;
    use serde_json::json;

    fn context() -> ClientContext {
        ClientContext::new("https://graph.example.com").unwrap()
    }

    fn build(envelope: &BatchEnvelope) -> reqwest::Request {
        to_http_request(&reqwest::Client::new(), &context(), envelope).unwrap()
    }

    #[test]
    fn single_get_carries_markers_and_target() {
        let envelope = BatchEnvelope::single(CallDescriptor::read("TourEiffel"));
        let request = build(&envelope);

        assert_eq!(request.method(), reqwest::Method::GET);
        let url = request.url();
        assert_eq!(url.path(), "/TourEiffel");
        let pairs: Vec<_> = url.query_pairs().collect();
        assert!(pairs.iter().any(|(k, v)| k == "sdk" && v == "graphwire"));
        assert!(pairs.iter().any(|(k, v)| k == "format" && v == "json"));
        let ua = request
            .headers()
            .get(reqwest::header::USER_AGENT)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(ua.starts_with("graphwire"), "{ua}");
    }

    #[test]
    fn single_get_serializes_params_as_query() {
        let descriptor = CallDescriptor::read("search")
            .with_param("q", "coffee")
            .with_param("limit", 5);
        let request = build(&BatchEnvelope::single(descriptor));
        let pairs: Vec<_> = request.url().query_pairs().collect();
        assert!(pairs.iter().any(|(k, v)| k == "q" && v == "coffee"));
        assert!(pairs.iter().any(|(k, v)| k == "limit" && v == "5"));
    }

    #[test]
    fn rest_method_routes_through_rest_base() {
        let descriptor = CallDescriptor::rest("users.getInfo").with_param("uids", "4");
        let request = build(&BatchEnvelope::single(descriptor));
        assert_eq!(request.url().path(), "/method/users.getInfo");
    }

    #[test]
    fn single_post_uses_form_body() {
        let descriptor = CallDescriptor::write("me/feed", json!({"message": "hello"}));
        let request = build(&BatchEnvelope::single(descriptor));
        assert_eq!(request.method(), reqwest::Method::POST);
        let body = request.body().and_then(reqwest::Body::as_bytes).unwrap();
        let body = std::str::from_utf8(body).unwrap();
        assert!(body.contains("message=hello"), "{body}");
    }

    #[test]
    fn descriptor_access_token_overrides_context() {
        let mut descriptor = CallDescriptor::read("me");
        descriptor.set_access_token("per-call");
        let envelope = BatchEnvelope::single(descriptor);
        let context = context().with_access_token("shared");
        let request = to_http_request(&reqwest::Client::new(), &context, &envelope).unwrap();
        let pairs: Vec<_> = request.url().query_pairs().collect();
        assert!(
            pairs
                .iter()
                .any(|(k, v)| k == ACCESS_TOKEN_KEY && v == "per-call")
        );
    }

    #[test]
    fn batch_is_one_post_with_ordered_entries() {
        let envelope: BatchEnvelope = [
            CallDescriptor::read("me"),
            CallDescriptor::read("me/friends"),
        ]
        .into_iter()
        .collect();
        let request = build(&envelope);

        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/");

        let body = request.body().and_then(reqwest::Body::as_bytes).unwrap();
        let decoded: Vec<(String, String)> = url::form_urlencoded::parse(body)
            .into_owned()
            .collect();
        let batch = &decoded
            .iter()
            .find(|(k, _)| k == BATCH_PARAM_KEY)
            .unwrap()
            .1;
        let entries: Vec<Value> = serde_json::from_str(batch).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["relative_url"], "me");
        assert_eq!(entries[0]["method"], "GET");
        assert_eq!(entries[1]["relative_url"], "me/friends");
    }

    #[test]
    fn batch_entry_names_and_result_refs_pass_through() {
        let first = CallDescriptor::read("search")
            .with_param("q", "restaurant")
            .with_batch_entry_name("places");
        let second =
            CallDescriptor::read("").with_param("ids", result_ref("places", "$.data.0.id"));
        let envelope: BatchEnvelope = [first, second].into_iter().collect();
        let request = build(&envelope);

        let body = request.body().and_then(reqwest::Body::as_bytes).unwrap();
        let decoded: Vec<(String, String)> = url::form_urlencoded::parse(body)
            .into_owned()
            .collect();
        let batch = &decoded
            .iter()
            .find(|(k, _)| k == BATCH_PARAM_KEY)
            .unwrap()
            .1;
        let entries: Vec<Value> = serde_json::from_str(batch).unwrap();
        assert_eq!(entries[0]["name"], "places");
        let second_url = entries[1]["relative_url"].as_str().unwrap();
        assert!(
            second_url.contains("%7Bresult%3Dplaces%3A%24.data.0.id%7D")
                || second_url.contains("{result=places:$.data.0.id}"),
            "{second_url}"
        );
    }

    #[test]
    fn batch_entries_carry_their_own_access_tokens() {
        let mut first = CallDescriptor::read("me");
        first.set_access_token("token-one");
        let mut second = CallDescriptor::write("me/feed", json!({"message": "hi"}));
        second.set_access_token("token-two");
        let envelope: BatchEnvelope = [first, second].into_iter().collect();
        let request = build(&envelope);

        let body = request.body().and_then(reqwest::Body::as_bytes).unwrap();
        let decoded: Vec<(String, String)> = url::form_urlencoded::parse(body)
            .into_owned()
            .collect();
        let batch = &decoded
            .iter()
            .find(|(k, _)| k == BATCH_PARAM_KEY)
            .unwrap()
            .1;
        let entries: Vec<Value> = serde_json::from_str(batch).unwrap();
        let first_url = entries[0]["relative_url"].as_str().unwrap();
        assert!(first_url.contains("access_token=token-one"), "{first_url}");
        // A POST entry's token travels in its body with the other parameters.
        let second_body = entries[1]["body"].as_str().unwrap();
        assert!(
            second_body.contains("access_token=token-two"),
            "{second_body}"
        );
    }

    #[test]
    fn batch_post_entry_moves_params_to_body() {
        let envelope: BatchEnvelope = [
            CallDescriptor::write("me/feed", json!({"message": "first post"})),
            CallDescriptor::read("me"),
        ]
        .into_iter()
        .collect();
        let request = build(&envelope);
        let body = request.body().and_then(reqwest::Body::as_bytes).unwrap();
        let decoded: Vec<(String, String)> = url::form_urlencoded::parse(body)
            .into_owned()
            .collect();
        let batch = &decoded
            .iter()
            .find(|(k, _)| k == BATCH_PARAM_KEY)
            .unwrap()
            .1;
        let entries: Vec<Value> = serde_json::from_str(batch).unwrap();
        assert_eq!(entries[0]["method"], "POST");
        let entry_body = entries[0]["body"].as_str().unwrap();
        assert!(entry_body.contains("message=first+post"), "{entry_body}");
    }

    #[test]
    fn batch_attachments_become_multipart_parts() {
        let envelope: BatchEnvelope = [
            CallDescriptor::upload("me/photos", Attachment::png(vec![1, 2, 3])),
            CallDescriptor::read("me"),
        ]
        .into_iter()
        .collect();
        let request = build(&envelope);
        let content_type = request
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("multipart/form-data"), "{content_type}");
    }

    #[test]
    fn empty_envelope_is_a_usage_error() {
        let envelope = BatchEnvelope::default();
        let err =
            to_http_request(&reqwest::Client::new(), &context(), &envelope).unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn conflicting_target_is_rejected_at_submission() {
        let mut descriptor = CallDescriptor::new();
        descriptor.set_graph_path("me");
        descriptor.set_rest_method("users.getInfo");
        let err = to_http_request(
            &reqwest::Client::new(),
            &context(),
            &BatchEnvelope::single(descriptor),
        )
        .unwrap_err();
        assert!(err.is_usage());
    }
}
