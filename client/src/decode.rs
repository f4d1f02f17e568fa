//! Transport decoding: wire response → ordered per-call [`CallResult`]s.
//!
//! A batched response is an ordered JSON array of `{code, body}` objects;
//! position correlates 1:1 with the originating descriptor. Each `body` is a
//! stringified JSON document parsed independently. An embedded error shape,
//! or a non-success sub-response code, yields an error result for that
//! descriptor without affecting its siblings - a 200 carrying the error shape
//! is an application-level failure, not a transport failure.

use serde_json::Value;

use graphwire_types::{
    CallResult, GraphError, Payload, TransportErrorKind, UNKNOWN_ERROR_CODE,
};

/// Decode the response of a single-descriptor exchange.
#[must_use]
pub fn decode_single_response(status: u16, body: &str) -> CallResult {
    decode_body(status, body)
}

/// Decode the response of a multi-descriptor exchange into exactly
/// `expected` results, in descriptor order.
///
/// A response that is not an ordered array of the expected arity is a
/// malformed envelope: every descriptor gets the same transport error.
#[must_use]
pub fn decode_batch_response(status: u16, body: &str, expected: usize) -> Vec<CallResult> {
    let parsed: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            return all_failed(
                expected,
                GraphError::transport(
                    TransportErrorKind::MalformedResponse,
                    format!("batch response is not valid JSON: {e}"),
                ),
            );
        }
    };

    // The remote side reports batch-level failures (bad batch parameter,
    // auth) as a single error object rather than an array.
    if let Some(error) = service_error(&parsed, body) {
        return all_failed(expected, error);
    }

    let entries = match parsed.as_array() {
        Some(entries) => entries,
        None => {
            return all_failed(
                expected,
                GraphError::transport(
                    TransportErrorKind::MalformedResponse,
                    format!(
                        "expected a batch response array (HTTP {status}), got: {}",
                        type_name(&parsed)
                    ),
                ),
            );
        }
    };

    if entries.len() != expected {
        tracing::warn!(
            expected,
            received = entries.len(),
            "batch response arity mismatch"
        );
        return all_failed(
            expected,
            GraphError::transport(
                TransportErrorKind::MalformedResponse,
                format!(
                    "batch response carried {} entries for {expected} calls",
                    entries.len()
                ),
            ),
        );
    }

    entries.iter().map(decode_batch_entry).collect()
}

/// One `{code, body}` sub-response. The body arrives stringified; be lenient
/// and accept an inline object too.
fn decode_batch_entry(entry: &Value) -> CallResult {
    let code = entry
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
        .unwrap_or(200);

    match entry.get("body") {
        Some(Value::String(raw)) => decode_body(code, raw),
        Some(Value::Null) | None => {
            if (200..300).contains(&code) {
                CallResult::empty()
            } else {
                CallResult::failure(GraphError::transport(
                    TransportErrorKind::MalformedResponse,
                    format!("sub-response {code} carried no body"),
                ))
            }
        }
        Some(inline) => classify(code, inline, &inline.to_string()),
    }
}

/// Decode one response body: error shape, list payload, or object payload.
fn decode_body(status: u16, body: &str) -> CallResult {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return if (200..300).contains(&status) {
            CallResult::empty()
        } else {
            CallResult::failure(GraphError::transport(
                TransportErrorKind::MalformedResponse,
                format!("HTTP {status} with empty body"),
            ))
        };
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(parsed) => classify(status, &parsed, trimmed),
        Err(e) => CallResult::failure(GraphError::transport(
            TransportErrorKind::MalformedResponse,
            format!("response body is not valid JSON (HTTP {status}): {e}"),
        )),
    }
}

fn classify(status: u16, parsed: &Value, raw: &str) -> CallResult {
    if let Some(error) = service_error(parsed, raw) {
        return CallResult::failure(error);
    }

    if !(200..300).contains(&status) {
        // Non-success without a recognizable error shape.
        return CallResult::failure(GraphError::Service {
            error_type: None,
            code: UNKNOWN_ERROR_CODE,
            message: format!("HTTP {status}"),
            body: raw.to_string(),
        });
    }

    match parsed {
        Value::Array(items) => CallResult::success(Payload::List(items.clone())),
        other => match data_list(other) {
            Some(items) => CallResult::success(Payload::List(items)),
            None => CallResult::success(Payload::Object(other.clone())),
        },
    }
}

/// Recognize the two remote error shapes: graph (`{"error": {type, code,
/// message}}`) and legacy REST (`{"error_code", "error_msg"}`). Presence of
/// either in an otherwise-successful response is itself an error condition.
fn service_error(parsed: &Value, raw: &str) -> Option<GraphError> {
    if let Some(error) = parsed.get("error")
        && error.is_object()
    {
        let message = error
            .pointer("/message")
            .and_then(Value::as_str)
            .unwrap_or("unknown service error")
            .to_string();
        return Some(GraphError::Service {
            error_type: error
                .pointer("/type")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            code: error
                .pointer("/code")
                .and_then(Value::as_i64)
                .unwrap_or(UNKNOWN_ERROR_CODE),
            message,
            body: raw.to_string(),
        });
    }

    if let Some(code) = parsed.get("error_code").and_then(Value::as_i64) {
        let message = parsed
            .get("error_msg")
            .and_then(Value::as_str)
            .unwrap_or("unknown service error")
            .to_string();
        return Some(GraphError::Service {
            error_type: None,
            code,
            message,
            body: raw.to_string(),
        });
    }

    None
}

/// An object that is nothing but a `data` array (no paging, no siblings)
/// decodes as a homogeneous list.
fn data_list(parsed: &Value) -> Option<Vec<Value>> {
    let object = parsed.as_object()?;
    if object.len() != 1 {
        return None;
    }
    object.get("data")?.as_array().cloned()
}

fn all_failed(expected: usize, error: GraphError) -> Vec<CallResult> {
    (0..expected)
        .map(|_| CallResult::failure(error.clone()))
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
