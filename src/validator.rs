//! Mapping Validator (§4.E) — checks a [`Mapping`] against the live
//! descriptor surface before it is allowed into the Mapping Table.

use serde_json::Value;

use crate::error::ValidationError;
use crate::mapping::Mapping;
use crate::message::defaults_to_json;
use crate::registry::DescriptorRegistry;

/// Validate `mapping` against `registry`, per §4.E steps 1-5. Returns the
/// fully checked mapping unchanged (ownership passes through) so callers
/// can chain this directly into `MappingTable::set_mappings`.
pub fn validate(mapping: &Mapping, registry: &DescriptorRegistry) -> Result<(), ValidationError> {
  let method = registry.find_method(&mapping.service, &mapping.method)
    .ok_or_else(|| ValidationError::UnknownEndpoint(mapping.path()))?;

  let input_defaults = defaults_to_json(&method.input_desc);
  let output_defaults = match &method.output_desc {
    Some(desc) => defaults_to_json(desc),
    None => Value::Object(Default::default()),
  };

  for (path, matcher) in &mapping.request_body {
    let observed = crate::jsonpath::get(&input_defaults, path)
      .ok_or_else(|| ValidationError::UnresolvedRequestPath(path.clone()))?;
    check_type(path, matcher.expected(), observed)?;
  }

  for (path, value) in &mapping.response_body {
    if is_placeholder(value) {
      continue;
    }
    let observed = crate::jsonpath::get(&output_defaults, path)
      .ok_or_else(|| ValidationError::UnresolvedResponsePath(path.clone()))?;
    check_type(path, value, observed)?;
  }

  Ok(())
}

fn is_placeholder(value: &Value) -> bool {
  matches!(value, Value::String(s) if s.starts_with('$'))
}

/// The observed (default-materialized) value's runtime type must match the
/// configured value's type. Cross-numeric-kind comparisons (int vs. float)
/// are both "number" and considered compatible, matching the matcher's own
/// notion of numeric equality (§4.A).
fn check_type(path: &str, configured: &Value, observed: &Value) -> Result<(), ValidationError> {
  if type_name(configured) == type_name(observed) {
    return Ok(());
  }
  Err(ValidationError::TypeMismatch {
    path: path.to_string(),
    expected: type_name(observed),
    actual: type_name(configured),
  })
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

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mapping::{MappingSpec, MatcherSpec, ResponseSpec};
  use crate::message::test_support::compile_descriptor_set;
  use indexmap::IndexMap;
  use serde_json::json;

  fn registry() -> DescriptorRegistry {
    let fds = compile_descriptor_set(r#"
      syntax = "proto3";
      package demo;
      message EchoReq { string msg = 1; int32 count = 2; }
      message EchoResp { string reply = 1; }
      service Echo { rpc Say(EchoReq) returns (EchoResp); }
    "#);
    DescriptorRegistry::load(vec![fds], false).unwrap()
  }

  fn base_spec() -> MappingSpec {
    MappingSpec {
      id: String::new(),
      endpoint: "demo.Echo/Say".to_string(),
      metadata: IndexMap::new(),
      request_body: IndexMap::new(),
      response: ResponseSpec { code: String::new(), body: IndexMap::new(), error_message: String::new() },
    }
  }

  #[test]
  fn unknown_endpoint_is_rejected() {
    let reg = registry();
    let mut spec = base_spec();
    spec.endpoint = "demo.Echo/Nope".to_string();
    let mapping = Mapping::from_spec(spec).unwrap();
    assert!(matches!(validate(&mapping, &reg), Err(ValidationError::UnknownEndpoint(_))));
  }

  #[test]
  fn resolvable_request_path_with_matching_type_is_ok() {
    let reg = registry();
    let mut spec = base_spec();
    spec.request_body.insert("msg".to_string(), MatcherSpec { rule: "equal".to_string(), value: json!("hi") });
    let mapping = Mapping::from_spec(spec).unwrap();
    assert!(validate(&mapping, &reg).is_ok());
  }

  #[test]
  fn unresolved_request_path_is_rejected() {
    let reg = registry();
    let mut spec = base_spec();
    spec.request_body.insert("nope".to_string(), MatcherSpec { rule: "equal".to_string(), value: json!("hi") });
    let mapping = Mapping::from_spec(spec).unwrap();
    assert!(matches!(validate(&mapping, &reg), Err(ValidationError::UnresolvedRequestPath(_))));
  }

  #[test]
  fn type_mismatch_on_request_path_is_rejected() {
    let reg = registry();
    let mut spec = base_spec();
    spec.request_body.insert("count".to_string(), MatcherSpec { rule: "equal".to_string(), value: json!("not a number") });
    let mapping = Mapping::from_spec(spec).unwrap();
    assert!(matches!(validate(&mapping, &reg), Err(ValidationError::TypeMismatch { .. })));
  }

  #[test]
  fn placeholder_response_values_skip_type_check() {
    let reg = registry();
    let mut spec = base_spec();
    spec.response.body.insert("reply".to_string(), json!("$req.body.msg"));
    let mapping = Mapping::from_spec(spec).unwrap();
    assert!(validate(&mapping, &reg).is_ok());
  }

  #[test]
  fn unresolved_response_path_is_rejected() {
    let reg = registry();
    let mut spec = base_spec();
    spec.response.body.insert("nope".to_string(), json!("literal"));
    let mapping = Mapping::from_spec(spec).unwrap();
    assert!(matches!(validate(&mapping, &reg), Err(ValidationError::UnresolvedResponsePath(_))));
  }
}
