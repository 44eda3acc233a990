//! Response Builder (§4.H) — synthesizes the JSON body for a matched
//! mapping, substituting `$req.body.*` and `$req.metadata.*` placeholders,
//! then hands the result to the Message Factory for conversion into the
//! method's actual output message.

use indexmap::IndexMap;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use serde_json::Value;

use crate::error::ResponseSynthesisError;
use crate::message::json_to_message;

const REQ_BODY_PREFIX: &str = "$req.body.";
const REQ_METADATA_PREFIX: &str = "$req.metadata.";

/// Build the synthesized JSON body for `response_body`, resolving
/// placeholders against the projected request body and metadata, per §4.H
/// steps 1-4.
pub fn build_body(
  response_body: &IndexMap<String, Value>,
  request_body: &Value,
  metadata: &IndexMap<String, String>,
) -> Result<Value, ResponseSynthesisError> {
  let mut out = Value::Object(Default::default());

  for (path, configured) in response_body {
    let resolved = resolve(configured, request_body, metadata);
    crate::jsonpath::set(&mut out, path, resolved)
      .map_err(|reason| ResponseSynthesisError::PathConflict { path: path.clone(), reason })?;
  }

  Ok(out)
}

fn resolve(configured: &Value, request_body: &Value, metadata: &IndexMap<String, String>) -> Value {
  match configured {
    Value::String(s) if s.starts_with(REQ_BODY_PREFIX) => {
      let path = &s[REQ_BODY_PREFIX.len()..];
      crate::jsonpath::get(request_body, path).cloned().unwrap_or(Value::Null)
    }
    Value::String(s) if s.starts_with(REQ_METADATA_PREFIX) => {
      let header = &s[REQ_METADATA_PREFIX.len()..];
      Value::String(metadata.get(header).cloned().unwrap_or_default())
    }
    other => other.clone(),
  }
}

/// Synthesize the full response: build the JSON body, then unmarshal it
/// into a fresh instance of the method's output message (§4.H final
/// paragraph). `discard_unknown_fields` controls whether a key in the
/// synthesized JSON that doesn't resolve to a field on the output message
/// is a `FAILED_PRECONDITION` or is silently dropped; see `dispatch`.
pub fn build_message(
  output_desc: &MessageDescriptor,
  response_body: &IndexMap<String, Value>,
  request_body: &Value,
  metadata: &IndexMap<String, String>,
  discard_unknown_fields: bool,
) -> Result<DynamicMessage, ResponseSynthesisError> {
  let body = build_body(response_body, request_body, metadata)?;
  json_to_message(output_desc, &body, discard_unknown_fields)
}
