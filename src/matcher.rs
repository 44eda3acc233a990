//! Value Matcher (§4.A) — a one-shot predicate evaluating a `(rule,
//! expected)` pair against an observed JSON value.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::InvalidMatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchingRule {
  Equal,
  Iequal,
  Contains,
  Regex,
  Glob,
}

impl MatchingRule {
  fn parse(name: &str) -> Result<MatchingRule, InvalidMatcher> {
    match name.to_lowercase().as_str() {
      "equal" => Ok(MatchingRule::Equal),
      "iequal" => Ok(MatchingRule::Iequal),
      "contains" => Ok(MatchingRule::Contains),
      "regex" => Ok(MatchingRule::Regex),
      "glob" => Ok(MatchingRule::Glob),
      other => Err(InvalidMatcher::UnknownRule(other.to_string())),
    }
  }
}

/// A compiled matcher: `{ rule, expected }` plus any pre-compiled pattern.
#[derive(Debug, Clone)]
pub struct ValueMatcher {
  rule: MatchingRule,
  expected: Value,
  compiled: Option<Regex>,
}

impl ValueMatcher {
  pub fn rule(&self) -> MatchingRule {
    self.rule
  }

  pub fn expected(&self) -> &Value {
    &self.expected
  }

  /// Construct a matcher from a raw rule name and expected value, failing
  /// with [`InvalidMatcher`] per the constructor invariants in spec §4.A.
  pub fn new(rule_name: &str, expected: Value) -> Result<ValueMatcher, InvalidMatcher> {
    let rule = MatchingRule::parse(rule_name)?;

    let compiled = match rule {
      MatchingRule::Regex => Some(compile_regex(&expected)?),
      MatchingRule::Glob => Some(compile_glob(&expected)?),
      MatchingRule::Iequal => {
        if !expected.is_string() {
          return Err(InvalidMatcher::ExpectedMustBeString { rule: "iequal" });
        }
        None
      }
      MatchingRule::Equal | MatchingRule::Contains => None,
    };

    Ok(ValueMatcher { rule, expected, compiled })
  }

  /// Evaluate this matcher against an observed value (§4.A `Matches`).
  pub fn matches(&self, observed: &Value) -> bool {
    match self.rule {
      MatchingRule::Equal => loose_eq(&self.expected, observed),
      MatchingRule::Iequal => iequal(&self.expected, observed),
      MatchingRule::Contains => contains(&self.expected, observed),
      MatchingRule::Regex | MatchingRule::Glob => {
        let pattern = self.compiled.as_ref().expect("regex/glob matchers are always compiled");
        match observed {
          Value::String(s) => pattern.is_match(s),
          _ => false,
        }
      }
    }
  }
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

fn compile_regex(expected: &Value) -> Result<Regex, InvalidMatcher> {
  let pattern = expected.as_str().ok_or(InvalidMatcher::ExpectedMustBeString { rule: "regex" })?;
  Regex::new(pattern).map_err(|err| InvalidMatcher::PatternCompile {
    rule: "regex",
    pattern: pattern.to_string(),
    reason: err.to_string(),
  })
}

fn compile_glob(expected: &Value) -> Result<Regex, InvalidMatcher> {
  let pattern = expected.as_str().ok_or(InvalidMatcher::ExpectedMustBeString { rule: "glob" })?;
  let translated = glob_to_regex(pattern);
  Regex::new(&translated).map_err(|err| InvalidMatcher::PatternCompile {
    rule: "glob",
    pattern: pattern.to_string(),
    reason: err.to_string(),
  })
}

/// Translate shell-style wildcards (`*` any run, `?` one codepoint) into an
/// anchored regex, escaping every other character.
fn glob_to_regex(glob: &str) -> String {
  let mut out = String::with_capacity(glob.len() * 2 + 2);
  out.push('^');
  for ch in glob.chars() {
    match ch {
      '*' => out.push_str(".*"),
      '?' => out.push('.'),
      _ => {
        if regex_syntax::is_meta_character(ch) {
          out.push('\\');
        }
        out.push(ch);
      }
    }
  }
  out.push('$');
  out
}

/// Deep-equal with cross-numeric-kind coercion: when both operands are
/// numbers they compare by 64-bit float value; otherwise structural
/// equality over lists, objects and scalars.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Number(a), Value::Number(b)) => {
      let (af, bf) = (a.as_f64(), b.as_f64());
      matches!((af, bf), (Some(af), Some(bf)) if af == bf)
    }
    (Value::Array(a), Value::Array(b)) => {
      a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| loose_eq(x, y))
    }
    (Value::Object(a), Value::Object(b)) => {
      a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).map(|bv| loose_eq(v, bv)).unwrap_or(false))
    }
    _ => a == b,
  }
}

fn iequal(expected: &Value, observed: &Value) -> bool {
  match (expected, observed) {
    (Value::String(a), Value::String(b)) => a.to_lowercase() == b.to_lowercase(),
    _ => loose_eq(expected, observed),
  }
}

fn contains(expected: &Value, observed: &Value) -> bool {
  match observed {
    Value::String(haystack) => match expected {
      Value::String(needle) => haystack.contains(needle.as_str()),
      Value::Number(n) => match n.as_u64().and_then(|codepoint| char::from_u32(codepoint as u32)) {
        Some(ch) => haystack.chars().any(|c| c == ch),
        None => false,
      },
      _ => false,
    },
    Value::Array(items) => items.iter().any(|item| loose_eq(item, expected)),
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use expectest::prelude::*;
  use rstest::rstest;
  use serde_json::json;

  #[test]
  fn equal_is_numerically_cross_kind() {
    let matcher = ValueMatcher::new("equal", json!(1)).unwrap();
    expect!(matcher.matches(&json!(1.0))).to(be_true());
  }

  #[test]
  fn equal_is_reflexive_over_structural_values() {
    let value = json!({"a": [1, 2, {"b": "c"}]});
    let matcher = ValueMatcher::new("equal", value.clone()).unwrap();
    expect!(matcher.matches(&value)).to(be_true());
  }

  #[test]
  fn iequal_case_insensitive_ascii() {
    let matcher = ValueMatcher::new("iequal", json!("Hello")).unwrap();
    expect!(matcher.matches(&json!("HELLO"))).to(be_true());
    expect!(matcher.matches(&json!("hello"))).to(be_true());
  }

  #[test]
  fn iequal_requires_a_string_expected() {
    expect!(ValueMatcher::new("iequal", json!(5))).to(be_err());
    expect!(ValueMatcher::new("iequal", json!(["a"]))).to(be_err());
  }

  #[test]
  fn iequal_degrades_to_deep_equal_when_observed_is_not_a_string() {
    // expected is always a string (construction-time invariant); when the
    // observed value isn't a string, the case-fold comparison doesn't
    // apply and this falls through to plain deep-equal, which a string
    // can never satisfy against a non-string value.
    let matcher = ValueMatcher::new("iequal", json!("5")).unwrap();
    expect!(matcher.matches(&json!(5))).to(be_false());
    expect!(matcher.matches(&json!(["5"]))).to(be_false());
  }

  #[test]
  fn contains_substring() {
    let matcher = ValueMatcher::new("contains", json!("World")).unwrap();
    expect!(matcher.matches(&json!("Hello World"))).to(be_true());
    expect!(matcher.matches(&json!("Hello"))).to(be_false());
  }

  #[test]
  fn contains_codepoint_membership() {
    let matcher = ValueMatcher::new("contains", json!(0x2764u32)).unwrap();
    expect!(matcher.matches(&json!("i \u{2764} rust"))).to(be_true());
  }

  #[test]
  fn contains_element_in_sequence() {
    let matcher = ValueMatcher::new("contains", json!("b")).unwrap();
    expect!(matcher.matches(&json!(["a", "b", "c"]))).to(be_true());
    expect!(matcher.matches(&json!(["a", "c"]))).to(be_false());
  }

  #[test]
  fn contains_on_other_kinds_is_false() {
    let matcher = ValueMatcher::new("contains", json!("x")).unwrap();
    expect!(matcher.matches(&json!(42))).to(be_false());
  }

  #[test]
  fn regex_matches() {
    let matcher = ValueMatcher::new("regex", json!("^test/.*$")).unwrap();
    expect!(matcher.matches(&json!("test/1.0"))).to(be_true());
    expect!(matcher.matches(&json!("prod/1.0"))).to(be_false());
  }

  #[test]
  fn regex_compile_failure_is_invalid_matcher() {
    expect!(ValueMatcher::new("regex", json!("(unterminated"))).to(be_err());
  }

  #[test]
  fn glob_matches_shell_wildcards() {
    let matcher = ValueMatcher::new("glob", json!("foo-*-bar")).unwrap();
    expect!(matcher.matches(&json!("foo-123-bar"))).to(be_true());
    expect!(matcher.matches(&json!("foo-bar"))).to(be_false());

    let single = ValueMatcher::new("glob", json!("a?c")).unwrap();
    expect!(single.matches(&json!("abc"))).to(be_true());
    expect!(single.matches(&json!("ac"))).to(be_false());
  }

  #[test]
  fn regex_on_non_string_expected_is_invalid() {
    expect!(ValueMatcher::new("regex", json!(1))).to(be_err());
  }

  #[test]
  fn unknown_rule_is_invalid() {
    expect!(ValueMatcher::new("startswith", json!("x"))).to(be_err());
  }

  #[rstest]
  #[case("foo-*-bar", "foo-123-bar", true)]
  #[case("foo-*-bar", "foo-bar", false)]
  #[case("a?c", "abc", true)]
  #[case("a?c", "ac", false)]
  #[case("*.proto", "demo/echo.proto", true)]
  #[case("*.proto", "demo/echo.json", false)]
  fn glob_cases(#[case] pattern: &str, #[case] observed: &str, #[case] expected: bool) {
    let matcher = ValueMatcher::new("glob", json!(pattern)).unwrap();
    expect!(matcher.matches(&json!(observed))).to(be_equal_to(expected));
  }

  #[rstest]
  #[case(json!(1), json!(1.0), true)]
  #[case(json!(1), json!(2), false)]
  #[case(json!("a"), json!("a"), true)]
  #[case(json!({"x": 1}), json!({"x": 1.0}), true)]
  #[case(json!([1, 2]), json!([1, 2]), true)]
  #[case(json!([1, 2]), json!([2, 1]), false)]
  fn equal_cases(#[case] expected: Value, #[case] observed: Value, #[case] matches: bool) {
    let matcher = ValueMatcher::new("equal", expected).unwrap();
    expect!(matcher.matches(&observed)).to(be_equal_to(matches));
  }
}
