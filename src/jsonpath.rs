//! Dotted-path addressing into a `serde_json::Value` tree.
//!
//! A path is a `.`-separated list of segments. A segment that parses as a
//! non-negative integer indexes into an array; any other segment is an
//! object key. Used by the Mapping Validator, the Request Matcher and the
//! Response Builder — every JSON-path mentioned in §4 of the specification
//! goes through here.

use serde_json::{Map, Value};

/// Split a dotted path into its segments. An empty path has zero segments.
pub fn segments(path: &str) -> Vec<&str> {
  if path.is_empty() {
    vec![]
  } else {
    path.split('.').collect()
  }
}

/// Resolve `path` against `root`, returning `None` if any segment is
/// missing. A missing path is a mismatch, not an error — callers that need
/// to distinguish "absent" from "present but null" should check the
/// returned `Option` directly rather than unwrapping to `Value::Null`.
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
  let mut current = root;
  for segment in segments(path) {
    current = match current {
      Value::Object(map) => map.get(segment)?,
      Value::Array(items) => {
        let index: usize = segment.parse().ok()?;
        items.get(index)?
      }
      _ => return None,
    };
  }
  Some(current)
}

/// Set `value` at `path` within `root`, creating intermediate objects (and
/// arrays, for purely numeric segments) as needed. Fails if an intermediate
/// segment would have to overwrite an existing scalar, mirroring the
/// "cannot be represented" failure from the Response Builder (§4.H).
pub fn set(root: &mut Value, path: &str, value: Value) -> Result<(), String> {
  let parts = segments(path);
  if parts.is_empty() {
    return Err("cannot set the root path".to_string());
  }
  set_rec(root, &parts, value)
}

fn set_rec(current: &mut Value, parts: &[&str], value: Value) -> Result<(), String> {
  let (head, rest) = parts.split_first().expect("non-empty by construction");

  if rest.is_empty() {
    assign(current, head, value)
  } else {
    let child = child_slot(current, head, looks_like_index(rest[0]))?;
    set_rec(child, rest, value)
  }
}

fn looks_like_index(segment: &str) -> bool {
  !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}

/// Ensure `current[head]` exists as a container (object or array, matching
/// whether the *next* segment looks like an array index) and return a
/// mutable reference to it.
fn child_slot<'a>(current: &'a mut Value, head: &str, next_is_index: bool) -> Result<&'a mut Value, String> {
  match current {
    Value::Null => {
      *current = Value::Object(Map::new());
      child_slot(current, head, next_is_index)
    }
    Value::Object(map) => {
      let entry = map.entry(head.to_string()).or_insert_with(|| {
        if next_is_index { Value::Array(vec![]) } else { Value::Object(Map::new()) }
      });
      Ok(entry)
    }
    Value::Array(items) => {
      let index: usize = head.parse().map_err(|_| format!("'{}' is not a valid array index", head))?;
      if index >= items.len() {
        items.resize(index + 1, Value::Null);
      }
      if items[index].is_null() {
        items[index] = if next_is_index { Value::Array(vec![]) } else { Value::Object(Map::new()) };
      }
      Ok(&mut items[index])
    }
    other => Err(format!("path segment '{}' collides with an existing {} value", head, type_name(other))),
  }
}

fn assign(current: &mut Value, head: &str, value: Value) -> Result<(), String> {
  match current {
    Value::Null => {
      *current = Value::Object(Map::new());
      assign(current, head, value)
    }
    Value::Object(map) => {
      map.insert(head.to_string(), value);
      Ok(())
    }
    Value::Array(items) => {
      let index: usize = head.parse().map_err(|_| format!("'{}' is not a valid array index", head))?;
      if index >= items.len() {
        items.resize(index + 1, Value::Null);
      }
      items[index] = value;
      Ok(())
    }
    other => Err(format!("path segment '{}' collides with an existing {} value", head, type_name(other))),
  }
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
