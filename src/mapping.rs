//! Mapping Record (§4.B) — binds an endpoint and a set of matchers over
//! metadata and request body to a synthesized response.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tonic::Code;
use uuid::Uuid;

use crate::error::InvalidMatcher;
use crate::matcher::ValueMatcher;

/// Wire/JSON representation of a `ValueMatcher`, as it appears in a mapping
/// file (`{"rule": "...", "value": ...}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherSpec {
  pub rule: String,
  #[serde(default)]
  pub value: Value,
}

/// Wire/JSON representation of `Response` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSpec {
  #[serde(default)]
  pub code: String,
  #[serde(default)]
  pub body: IndexMap<String, Value>,
  #[serde(default, rename = "error_message")]
  pub error_message: String,
}

/// Wire/JSON representation of a Mapping (§6 schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingSpec {
  #[serde(default)]
  pub id: String,
  pub endpoint: String,
  #[serde(default)]
  pub metadata: IndexMap<String, MatcherSpec>,
  #[serde(default, rename = "request_body")]
  pub request_body: IndexMap<String, MatcherSpec>,
  #[serde(default)]
  pub response: ResponseSpec,
}

/// Either a single mapping object or an array of them, per §6's "each file
/// is either a single Mapping object or an array of Mapping objects".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MappingFile {
  One(MappingSpec),
  Many(Vec<MappingSpec>),
}

impl MappingFile {
  pub fn into_specs(self) -> Vec<MappingSpec> {
    match self {
      MappingFile::One(spec) => vec![spec],
      MappingFile::Many(specs) => specs,
    }
  }
}

pub const DEFAULT_CODE: &str = "OK";
pub const UNKNOWN_ERROR_MESSAGE: &str = "<unknown error message>";

/// The 17 canonical gRPC status names (§3).
pub fn parse_code(name: &str) -> Option<Code> {
  Some(match name {
    "OK" => Code::Ok,
    "CANCELLED" => Code::Cancelled,
    "UNKNOWN" => Code::Unknown,
    "INVALID_ARGUMENT" => Code::InvalidArgument,
    "DEADLINE_EXCEEDED" => Code::DeadlineExceeded,
    "NOT_FOUND" => Code::NotFound,
    "ALREADY_EXISTS" => Code::AlreadyExists,
    "PERMISSION_DENIED" => Code::PermissionDenied,
    "RESOURCE_EXHAUSTED" => Code::ResourceExhausted,
    "FAILED_PRECONDITION" => Code::FailedPrecondition,
    "ABORTED" => Code::Aborted,
    "OUT_OF_RANGE" => Code::OutOfRange,
    "UNIMPLEMENTED" => Code::Unimplemented,
    "INTERNAL" => Code::Internal,
    "UNAVAILABLE" => Code::Unavailable,
    "DATA_LOSS" => Code::DataLoss,
    "UNAUTHENTICATED" => Code::Unauthenticated,
    _ => return None,
  })
}

/// Fully resolved, constructed Mapping (§3). Produced by
/// [`Mapping::from_spec`], which performs the `Validate()` normalization
/// described in §4.B.
#[derive(Debug, Clone)]
pub struct Mapping {
  pub id: String,
  pub service: String,
  pub method: String,
  pub metadata: IndexMap<String, ValueMatcher>,
  pub request_body: IndexMap<String, ValueMatcher>,
  pub response_code: Code,
  pub response_body: IndexMap<String, Value>,
  pub error_message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
  #[error("endpoint is empty")]
  EmptyEndpoint,
  #[error("endpoint '{0}' does not split into exactly a service and a method")]
  MalformedEndpoint(String),
  #[error("unknown response status code '{0}'")]
  UnknownResponseCode(String),
  #[error("invalid matcher for '{path}': {source}")]
  InvalidMatcher { path: String, #[source] source: InvalidMatcher },
}

impl Mapping {
  /// Normalize and validate a [`MappingSpec`] in place, per §4.B
  /// `Validate()`: assigns a fresh id to an empty one, defaults the
  /// response code to `OK`, rejects empty/malformed endpoints, and
  /// constructs every matcher to surface compilation errors eagerly.
  pub fn from_spec(spec: MappingSpec) -> Result<Mapping, MappingError> {
    let id = if spec.id.trim().is_empty() { Uuid::new_v4().to_string() } else { spec.id };

    let trimmed = spec.endpoint.trim_matches('/');
    if trimmed.is_empty() {
      return Err(MappingError::EmptyEndpoint);
    }
    let mut parts = trimmed.splitn(2, '/');
    let service = parts.next().unwrap_or_default().to_string();
    let method = parts.next().ok_or_else(|| MappingError::MalformedEndpoint(spec.endpoint.clone()))?.to_string();
    if service.is_empty() || method.is_empty() || method.contains('/') {
      return Err(MappingError::MalformedEndpoint(spec.endpoint.clone()));
    }

    let metadata = build_matchers(spec.metadata)?;
    let request_body = build_matchers(spec.request_body)?;

    let code_name = if spec.response.code.trim().is_empty() { DEFAULT_CODE.to_string() } else { spec.response.code };
    let response_code = parse_code(&code_name).ok_or_else(|| MappingError::UnknownResponseCode(code_name))?;

    let error_message = if response_code != Code::Ok && spec.response.error_message.trim().is_empty() {
      UNKNOWN_ERROR_MESSAGE.to_string()
    } else {
      spec.response.error_message
    };

    Ok(Mapping {
      id,
      service,
      method,
      metadata,
      request_body,
      response_code,
      response_body: spec.response.body,
      error_message,
    })
  }

  /// Canonical `/package.Service/Method` path for this mapping's endpoint.
  pub fn path(&self) -> String {
    format!("/{}/{}", self.service, self.method)
  }

  /// §4.B `Matches(md, body)`: every metadata matcher and every request
  /// body matcher must match. A missing body path is a mismatch, not an
  /// error. Header values with multiple entries are joined on `,` before
  /// matching.
  pub fn matches(&self, metadata: &IndexMap<String, String>, body: &Value) -> bool {
    self.metadata.iter().all(|(key, matcher)| {
      match metadata.get(key) {
        Some(value) => matcher.matches(&Value::String(value.clone())),
        None => false,
      }
    }) && self.request_body.iter().all(|(path, matcher)| {
      match crate::jsonpath::get(body, path) {
        Some(value) => matcher.matches(value),
        None => false,
      }
    })
  }
}

fn build_matchers(specs: IndexMap<String, MatcherSpec>) -> Result<IndexMap<String, ValueMatcher>, MappingError> {
  let mut out = IndexMap::with_capacity(specs.len());
  for (path, spec) in specs {
    let matcher = ValueMatcher::new(&spec.rule, spec.value)
      .map_err(|source| MappingError::InvalidMatcher { path: path.clone(), source })?;
    out.insert(path, matcher);
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use expectest::prelude::*;
  use serde_json::json;

  fn spec(endpoint: &str) -> MappingSpec {
    MappingSpec {
      id: String::new(),
      endpoint: endpoint.to_string(),
      metadata: IndexMap::new(),
      request_body: IndexMap::new(),
      response: ResponseSpec { code: String::new(), body: IndexMap::new(), error_message: String::new() },
    }
  }

  #[test]
  fn assigns_fresh_id_when_absent() {
    let mapping = Mapping::from_spec(spec("demo.Echo/Say")).unwrap();
    expect!(mapping.id.is_empty()).to(be_false());
    expect!(mapping.service).to(be_equal_to("demo.Echo"));
    expect!(mapping.method).to(be_equal_to("Say"));
  }

  #[test]
  fn strips_leading_and_trailing_slashes() {
    let mapping = Mapping::from_spec(spec("/demo.Echo/Say/")).unwrap();
    expect!(mapping.path()).to(be_equal_to("/demo.Echo/Say"));
  }

  #[test]
  fn rejects_empty_endpoint() {
    expect!(Mapping::from_spec(spec(""))).to(be_err());
    expect!(Mapping::from_spec(spec("///"))).to(be_err());
  }

  #[test]
  fn rejects_malformed_endpoint() {
    expect!(Mapping::from_spec(spec("justoneword"))).to(be_err());
  }

  #[test]
  fn defaults_code_to_ok() {
    let mapping = Mapping::from_spec(spec("demo.Echo/Say")).unwrap();
    expect!(mapping.response_code).to(be_equal_to(Code::Ok));
    expect!(mapping.error_message).to(be_equal_to(""));
  }

  #[test]
  fn non_ok_code_without_message_gets_placeholder() {
    let mut s = spec("demo.Echo/Say");
    s.response.code = "PERMISSION_DENIED".to_string();
    let mapping = Mapping::from_spec(s).unwrap();
    expect!(mapping.error_message).to(be_equal_to(UNKNOWN_ERROR_MESSAGE));
  }

  #[test]
  fn unknown_code_is_rejected() {
    let mut s = spec("demo.Echo/Say");
    s.response.code = "WAT".to_string();
    expect!(Mapping::from_spec(s)).to(be_err());
  }

  #[test]
  fn matches_requires_every_matcher_to_match() {
    let mut s = spec("demo.Echo/Say");
    s.request_body.insert("msg".to_string(), MatcherSpec { rule: "equal".to_string(), value: json!("hi") });
    let mapping = Mapping::from_spec(s).unwrap();

    expect!(mapping.matches(&IndexMap::new(), &json!({"msg": "hi"}))).to(be_true());
    expect!(mapping.matches(&IndexMap::new(), &json!({"msg": "bye"}))).to(be_false());
    expect!(mapping.matches(&IndexMap::new(), &json!({}))).to(be_false());
  }

  #[test]
  fn matches_checks_metadata_too() {
    let mut s = spec("demo.Echo/Say");
    s.metadata.insert("x-tenant".to_string(), MatcherSpec { rule: "equal".to_string(), value: json!("bad") });
    let mapping = Mapping::from_spec(s).unwrap();

    let mut md = IndexMap::new();
    md.insert("x-tenant".to_string(), "bad".to_string());
    expect!(mapping.matches(&md, &json!({}))).to(be_true());

    md.insert("x-tenant".to_string(), "good".to_string());
    expect!(mapping.matches(&md, &json!({}))).to(be_false());
  }
}
