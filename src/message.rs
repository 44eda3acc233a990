//! Message Factory (§4.D) and JSON projection (§4.G) — converts between
//! `serde_json::Value` and `prost_reflect::DynamicMessage`, so that mapping
//! bodies authored as plain JSON can be encoded onto the wire as whatever
//! message type a given RPC actually declares, and decoded request bodies
//! can be handed to the Request Matcher as plain JSON.

use base64::Engine;
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, MapKey, MessageDescriptor, ReflectMessage, Value as DynValue};
use serde_json::{Map, Number, Value};

use crate::error::ResponseSynthesisError;

/// Recursion guard: a mapping body nested deeper than this is almost
/// certainly a mistake (or hostile input) rather than a legitimate payload.
const MAX_DEPTH: usize = 64;

/// Build a [`DynamicMessage`] of `desc` from a JSON object, per §4.D/§4.G and
/// §4.H's unknown-field policy. A JSON key that doesn't resolve to a field
/// on `desc` is a `FAILED_PRECONDITION`-bound `Unmarshal` error unless
/// `discard_unknown_fields` is set, in which case it is silently dropped;
/// fields absent from `body` are left unset (protobuf3 default semantics at
/// encode time) either way.
pub fn json_to_message(desc: &MessageDescriptor, body: &Value, discard_unknown_fields: bool) -> Result<DynamicMessage, ResponseSynthesisError> {
  let mut message = DynamicMessage::new(desc.clone());
  let object = match body {
    Value::Object(map) => map,
    Value::Null => return Ok(message),
    other => return Err(ResponseSynthesisError::Unmarshal(format!("expected a JSON object, got {}", kind_name(other)))),
  };

  for (key, value) in object {
    let Some(field) = desc.get_field_by_name(key) else {
      if discard_unknown_fields {
        continue;
      }
      return Err(ResponseSynthesisError::Unmarshal(format!("unknown field '{}' on message '{}'", key, desc.full_name())));
    };
    if value.is_null() {
      continue;
    }
    let dyn_value = json_to_field_value(&field, value, 0, discard_unknown_fields)?;
    message.set_field(&field, dyn_value);
  }

  Ok(message)
}

fn json_to_field_value(field: &FieldDescriptor, value: &Value, depth: usize, discard_unknown_fields: bool) -> Result<DynValue, ResponseSynthesisError> {
  if depth > MAX_DEPTH {
    return Err(ResponseSynthesisError::Unmarshal(format!("field '{}' nests deeper than {} levels", field.name(), MAX_DEPTH)));
  }

  if field.is_map() {
    return json_to_map_value(field, value, depth, discard_unknown_fields);
  }
  if field.is_list() {
    return json_to_list_value(field, value, depth, discard_unknown_fields);
  }
  json_to_scalar_value(field.kind(), value, depth, discard_unknown_fields)
}

fn json_to_list_value(field: &FieldDescriptor, value: &Value, depth: usize, discard_unknown_fields: bool) -> Result<DynValue, ResponseSynthesisError> {
  let Value::Array(items) = value else {
    return Err(ResponseSynthesisError::Unmarshal(format!("field '{}' expects a JSON array", field.name())));
  };
  let mut out = Vec::with_capacity(items.len());
  for item in items {
    out.push(json_to_scalar_value(field.kind(), item, depth + 1, discard_unknown_fields)?);
  }
  Ok(DynValue::List(out))
}

fn json_to_map_value(field: &FieldDescriptor, value: &Value, depth: usize, discard_unknown_fields: bool) -> Result<DynValue, ResponseSynthesisError> {
  let Value::Object(entries) = value else {
    return Err(ResponseSynthesisError::Unmarshal(format!("field '{}' expects a JSON object", field.name())));
  };
  let Kind::Message(entry_desc) = field.kind() else {
    return Err(ResponseSynthesisError::Unmarshal(format!("field '{}' is marked as a map but has no entry type", field.name())));
  };
  let key_field = entry_desc.map_entry_key_field();
  let value_field = entry_desc.map_entry_value_field();

  let mut out = std::collections::HashMap::with_capacity(entries.len());
  for (key, raw_value) in entries {
    let map_key = json_string_to_map_key(key_field.kind(), key)?;
    let map_value = json_to_scalar_value(value_field.kind(), raw_value, depth + 1, discard_unknown_fields)?;
    out.insert(map_key, map_value);
  }
  Ok(DynValue::Map(out))
}

fn json_string_to_map_key(kind: Kind, key: &str) -> Result<MapKey, ResponseSynthesisError> {
  Ok(match kind {
    Kind::String => MapKey::String(key.to_string()),
    Kind::Bool => MapKey::Bool(key.parse().map_err(|_| ResponseSynthesisError::Unmarshal(format!("'{}' is not a bool map key", key)))?),
    Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => MapKey::I32(key.parse().map_err(|_| ResponseSynthesisError::Unmarshal(format!("'{}' is not an i32 map key", key)))?),
    Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => MapKey::I64(key.parse().map_err(|_| ResponseSynthesisError::Unmarshal(format!("'{}' is not an i64 map key", key)))?),
    Kind::Uint32 | Kind::Fixed32 => MapKey::U32(key.parse().map_err(|_| ResponseSynthesisError::Unmarshal(format!("'{}' is not a u32 map key", key)))?),
    Kind::Uint64 | Kind::Fixed64 => MapKey::U64(key.parse().map_err(|_| ResponseSynthesisError::Unmarshal(format!("'{}' is not a u64 map key", key)))?),
    other => return Err(ResponseSynthesisError::Unmarshal(format!("unsupported map key kind {:?}", other))),
  })
}

fn json_to_scalar_value(kind: Kind, value: &Value, depth: usize, discard_unknown_fields: bool) -> Result<DynValue, ResponseSynthesisError> {
  match kind {
    Kind::Message(desc) => {
      let message = json_to_message_nested(&desc, value, depth + 1, discard_unknown_fields)?;
      Ok(DynValue::Message(message))
    }
    Kind::Enum(enum_desc) => match value {
      Value::String(name) => enum_desc.get_value_by_name(name)
        .map(|v| DynValue::EnumNumber(v.number()))
        .ok_or_else(|| ResponseSynthesisError::Unmarshal(format!("unknown enum symbol '{}'", name))),
      Value::Number(n) => Ok(DynValue::EnumNumber(n.as_i64().unwrap_or_default() as i32)),
      other => Err(ResponseSynthesisError::Unmarshal(format!("enum field expects a string or number, got {}", kind_name(other)))),
    },
    Kind::Bool => value.as_bool().map(DynValue::Bool).ok_or_else(|| expected("bool", value)),
    Kind::Double => value.as_f64().map(DynValue::F64).ok_or_else(|| expected("double", value)),
    Kind::Float => value.as_f64().map(|f| DynValue::F32(f as f32)).ok_or_else(|| expected("float", value)),
    Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => numeric_i64(value).map(|n| DynValue::I32(n as i32)).ok_or_else(|| expected("int32", value)),
    Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => numeric_i64(value).map(DynValue::I64).ok_or_else(|| expected("int64", value)),
    Kind::Uint32 | Kind::Fixed32 => numeric_u64(value).map(|n| DynValue::U32(n as u32)).ok_or_else(|| expected("uint32", value)),
    Kind::Uint64 | Kind::Fixed64 => numeric_u64(value).map(DynValue::U64).ok_or_else(|| expected("uint64", value)),
    Kind::String => value.as_str().map(|s| DynValue::String(s.to_string())).ok_or_else(|| expected("string", value)),
    Kind::Bytes => match value {
      Value::String(encoded) => base64::engine::general_purpose::STANDARD.decode(encoded)
        .map(|bytes| DynValue::Bytes(bytes.into()))
        .map_err(|err| ResponseSynthesisError::Unmarshal(format!("invalid base64 for bytes field: {}", err))),
      other => Err(expected("base64 string", other)),
    },
  }
}

fn json_to_message_nested(desc: &MessageDescriptor, value: &Value, depth: usize, discard_unknown_fields: bool) -> Result<DynamicMessage, ResponseSynthesisError> {
  if depth > MAX_DEPTH {
    return Err(ResponseSynthesisError::Unmarshal(format!("message nests deeper than {} levels", MAX_DEPTH)));
  }
  let mut message = DynamicMessage::new(desc.clone());
  let object = match value {
    Value::Object(map) => map,
    Value::Null => return Ok(message),
    other => return Err(ResponseSynthesisError::Unmarshal(format!("expected a JSON object, got {}", kind_name(other)))),
  };
  for (key, field_value) in object {
    let Some(field) = desc.get_field_by_name(key) else {
      if discard_unknown_fields {
        continue;
      }
      return Err(ResponseSynthesisError::Unmarshal(format!("unknown field '{}' on message '{}'", key, desc.full_name())));
    };
    if field_value.is_null() {
      continue;
    }
    let dyn_value = json_to_field_value(&field, field_value, depth, discard_unknown_fields)?;
    message.set_field(&field, dyn_value);
  }
  Ok(message)
}

fn numeric_i64(value: &Value) -> Option<i64> {
  value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

fn numeric_u64(value: &Value) -> Option<u64> {
  value.as_u64().or_else(|| value.as_f64().map(|f| f as u64))
}

fn expected(what: &str, value: &Value) -> ResponseSynthesisError {
  ResponseSynthesisError::Unmarshal(format!("expected {}, got {}", what, kind_name(value)))
}

fn kind_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

/// Project a decoded [`DynamicMessage`] (the incoming request) into plain
/// JSON for the Request Matcher, per §4.G. Enums render as their symbolic
/// name, bytes render as standard base64, and unset scalar fields are
/// omitted rather than rendered as their zero value.
pub fn message_to_json(message: &DynamicMessage) -> Value {
  message_to_json_depth(message, 0)
}

fn message_to_json_depth(message: &DynamicMessage, depth: usize) -> Value {
  if depth > MAX_DEPTH {
    return Value::Null;
  }
  let mut object = Map::new();
  for field in message.descriptor().fields() {
    if !message.has_field(&field) && !field.is_list() && !field.is_map() {
      continue;
    }
    let value = message.get_field(&field);
    object.insert(field.name().to_string(), dyn_value_to_json_for_field(&field, &value, depth + 1));
  }
  Value::Object(object)
}

/// Render one field's value to JSON, consulting the field descriptor so
/// that enums render by symbolic name (§4.G) rather than as bare numbers,
/// and map/list element kinds are known at each level.
fn dyn_value_to_json_for_field(field: &FieldDescriptor, value: &DynValue, depth: usize) -> Value {
  if field.is_map() {
    let Kind::Message(entry_desc) = field.kind() else { return Value::Object(Map::new()) };
    let value_field = entry_desc.map_entry_value_field();
    let DynValue::Map(entries) = value else { return Value::Object(Map::new()) };
    let mut object = Map::new();
    for (key, val) in entries {
      object.insert(map_key_to_string(key), dyn_scalar_to_json(value_field.kind(), val, depth));
    }
    return Value::Object(object);
  }
  if field.is_list() {
    let DynValue::List(items) = value else { return Value::Array(vec![]) };
    return Value::Array(items.iter().map(|v| dyn_scalar_to_json(field.kind(), v, depth)).collect());
  }
  dyn_scalar_to_json(field.kind(), value, depth)
}

fn dyn_scalar_to_json(kind: Kind, value: &DynValue, depth: usize) -> Value {
  match (kind, value) {
    (Kind::Enum(enum_desc), DynValue::EnumNumber(n)) => enum_desc.get_value(*n)
      .map(|v| Value::String(v.name().to_string()))
      .unwrap_or_else(|| Value::Number((*n).into())),
    (Kind::Message(_), DynValue::Message(msg)) => message_to_json_depth(msg, depth),
    (Kind::Bytes, DynValue::Bytes(bytes)) => Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)),
    _ => match value {
      DynValue::Bool(b) => Value::Bool(*b),
      DynValue::I32(n) => Value::Number((*n).into()),
      DynValue::I64(n) => Value::Number((*n).into()),
      DynValue::U32(n) => Value::Number((*n).into()),
      DynValue::U64(n) => Number::from_f64(*n as f64).map(Value::Number).unwrap_or(Value::Null),
      DynValue::F32(n) => Number::from_f64(*n as f64).map(Value::Number).unwrap_or(Value::Null),
      DynValue::F64(n) => Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
      DynValue::String(s) => Value::String(s.clone()),
      DynValue::Bytes(bytes) => Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)),
      DynValue::EnumNumber(n) => Value::Number((*n).into()),
      DynValue::Message(msg) => message_to_json_depth(msg, depth),
      DynValue::List(_) | DynValue::Map(_) => Value::Null,
    }
  }
}

fn map_key_to_string(key: &MapKey) -> String {
  match key {
    MapKey::Bool(b) => b.to_string(),
    MapKey::I32(n) => n.to_string(),
    MapKey::I64(n) => n.to_string(),
    MapKey::U32(n) => n.to_string(),
    MapKey::U64(n) => n.to_string(),
    MapKey::String(s) => s.clone(),
  }
}

/// Project a message *descriptor* (no instance needed) to JSON with every
/// field materialized at its zero value, recursively, per the Mapping
/// Validator's §4.E step 3. A message type that recurses into itself is
/// cut off with an empty object rather than looping forever.
pub fn defaults_to_json(desc: &MessageDescriptor) -> Value {
  let mut seen = Vec::new();
  defaults_to_json_rec(desc, 0, &mut seen)
}

fn defaults_to_json_rec(desc: &MessageDescriptor, depth: usize, seen: &mut Vec<String>) -> Value {
  if depth > MAX_DEPTH || seen.iter().any(|n| n == desc.full_name()) {
    return Value::Object(Map::new());
  }
  seen.push(desc.full_name().to_string());

  let mut object = Map::new();
  for field in desc.fields() {
    let value = default_field_value(&field, depth + 1, seen);
    object.insert(field.name().to_string(), value);
  }

  seen.pop();
  Value::Object(object)
}

fn default_field_value(field: &FieldDescriptor, depth: usize, seen: &mut Vec<String>) -> Value {
  if field.is_map() {
    return Value::Object(Map::new());
  }
  if field.is_list() {
    return Value::Array(vec![]);
  }
  default_scalar_value(field.kind(), depth, seen)
}

fn default_scalar_value(kind: Kind, depth: usize, seen: &mut Vec<String>) -> Value {
  match kind {
    Kind::Message(desc) => defaults_to_json_rec(&desc, depth, seen),
    Kind::Enum(enum_desc) => enum_desc.values().next()
      .map(|v| Value::String(v.name().to_string()))
      .unwrap_or(Value::Null),
    Kind::Bool => Value::Bool(false),
    Kind::Double | Kind::Float => Value::Number(Number::from_f64(0.0).unwrap()),
    Kind::Int32 | Kind::Sint32 | Kind::Sfixed32
    | Kind::Int64 | Kind::Sint64 | Kind::Sfixed64
    | Kind::Uint32 | Kind::Fixed32
    | Kind::Uint64 | Kind::Fixed64 => Value::Number(0.into()),
    Kind::String => Value::String(String::new()),
    Kind::Bytes => Value::String(String::new()),
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use expectest::prelude::*;
  use serde_json::json;
  use test_support::compile_descriptor_set;

  fn echo_descriptor() -> MessageDescriptor {
    let fds = compile_descriptor_set(r#"
      syntax = "proto3";
      package demo;
      enum Color { RED = 0; BLUE = 1; }
      message Inner { string name = 1; }
      message Echo {
        string msg = 1;
        int32 count = 2;
        bytes payload = 3;
        Color color = 4;
        repeated string tags = 5;
        map<string, int32> counters = 6;
        Inner inner = 7;
      }
    "#);
    let pool = prost_reflect::DescriptorPool::from_file_descriptor_set(fds).unwrap();
    pool.get_message_by_name("demo.Echo").unwrap()
  }

  #[test]
  fn round_trips_scalars_and_bytes() {
    let desc = echo_descriptor();
    let body = json!({
      "msg": "hi",
      "count": 7,
      "payload": base64::engine::general_purpose::STANDARD.encode(b"abc"),
      "color": "BLUE",
      "tags": ["a", "b"],
      "counters": {"x": 1},
      "inner": {"name": "nested"}
    });

    let message = json_to_message(&desc, &body, false).unwrap();
    let projected = message_to_json(&message);

    expect!(&projected["msg"]).to(be_equal_to(&json!("hi")));
    expect!(&projected["count"]).to(be_equal_to(&json!(7)));
    expect!(&projected["color"]).to(be_equal_to(&json!("BLUE")));
    expect!(&projected["tags"]).to(be_equal_to(&json!(["a", "b"])));
    expect!(&projected["inner"]["name"]).to(be_equal_to(&json!("nested")));
  }

  #[test]
  fn unknown_fields_in_body_are_rejected_by_default() {
    let desc = echo_descriptor();
    let body = json!({"msg": "hi", "nonexistent": 42});
    expect!(json_to_message(&desc, &body, false)).to(be_err());
  }

  #[test]
  fn unknown_fields_in_body_are_discarded_when_flag_is_set() {
    let desc = echo_descriptor();
    let body = json!({"msg": "hi", "nonexistent": 42});
    let message = json_to_message(&desc, &body, true).unwrap();
    expect!(&message_to_json(&message)["msg"]).to(be_equal_to(&json!("hi")));
  }

  #[test]
  fn non_object_body_is_an_error() {
    let desc = echo_descriptor();
    expect!(json_to_message(&desc, &json!("not an object"), false)).to(be_err());
  }

  #[test]
  fn invalid_base64_is_rejected() {
    let desc = echo_descriptor();
    let body = json!({"payload": "not base64!!"});
    expect!(json_to_message(&desc, &body, false)).to(be_err());
  }

  #[test]
  fn unset_scalar_fields_are_omitted() {
    let desc = echo_descriptor();
    let body = json!({"msg": "hi"});
    let message = json_to_message(&desc, &body, false).unwrap();
    let projected = message_to_json(&message);
    expect!(projected.get("count")).to(be_none());
  }

  #[test]
  fn unknown_field_in_nested_message_is_rejected_by_default() {
    let desc = echo_descriptor();
    let body = json!({"inner": {"name": "nested", "bogus": "x"}});
    expect!(json_to_message(&desc, &body, false)).to(be_err());
  }

  #[test]
  fn defaults_materializes_every_field_at_zero_value() {
    let desc = echo_descriptor();
    let defaults = defaults_to_json(&desc);
    expect!(&defaults["msg"]).to(be_equal_to(&json!("")));
    expect!(&defaults["count"]).to(be_equal_to(&json!(0)));
    expect!(&defaults["tags"]).to(be_equal_to(&json!([])));
    expect!(&defaults["counters"]).to(be_equal_to(&json!({})));
    expect!(&defaults["color"]).to(be_equal_to(&json!("RED")));
    expect!(&defaults["inner"]["name"]).to(be_equal_to(&json!("")));
  }
}
