//! Error taxonomy for the mock server.
//!
//! Fatal errors (`ConfigError`, `DescriptorLoadError`, `MappingSyntaxError`,
//! `MappingSemanticError`) terminate the process at startup. The same two
//! mapping error variants are non-fatal during hot-reload: the reload is
//! simply aborted and the previous mapping table is retained. Per-call
//! failures never use this enum directly; they are mapped straight to a
//! `tonic::Status` in `dispatch`.

use thiserror::Error;

/// Top level error type returned by the fatal parts of startup.
#[derive(Debug, Error)]
pub enum MockServerError {
  #[error("configuration error: {0}")]
  Config(String),

  #[error("failed to load descriptor '{file}': {reason}")]
  DescriptorLoad { file: String, reason: String },

  #[error("descriptor set declares a dependency '{dependency}' that was never registered")]
  MissingDependency { dependency: String },

  #[error("service '{service}' is already registered and GRPC_IGNORE_DUPLICATE_SERVICE is not set")]
  DuplicateService { service: String },

  #[error("mapping file '{file}' is not valid JSON: {reason}")]
  MappingSyntax { file: String, reason: String },

  #[error("mapping {id} ({endpoint}) is invalid: {reason}")]
  MappingSemantic { id: String, endpoint: String, reason: String },

  #[error("listener bind failed on {addr}: {reason}")]
  BindFailed { addr: String, reason: String },

  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MockServerError>;

/// Errors raised while constructing a [`crate::matcher::ValueMatcher`].
#[derive(Debug, Error)]
pub enum InvalidMatcher {
  #[error("unknown matching rule '{0}'")]
  UnknownRule(String),

  #[error("matcher rule '{rule}' requires a string expected value")]
  ExpectedMustBeString { rule: &'static str },

  #[error("matcher rule '{rule}' does not support a {kind} expected value")]
  UnsupportedExpectedKind { rule: &'static str, kind: &'static str },

  #[error("failed to compile {rule} pattern '{pattern}': {reason}")]
  PatternCompile { rule: &'static str, pattern: String, reason: String },
}

/// Errors raised while validating a mapping against the live descriptor surface.
#[derive(Debug, Error)]
pub enum ValidationError {
  #[error("endpoint '{0}' is empty")]
  EmptyEndpoint(String),

  #[error("endpoint '{0}' does not split into exactly a service and a method")]
  MalformedEndpoint(String),

  #[error("no such service/method '{0}'")]
  UnknownEndpoint(String),

  #[error("unknown response status code '{0}'")]
  UnknownResponseCode(String),

  #[error("invalid matcher for '{path}': {source}")]
  InvalidMatcher { path: String, #[source] source: InvalidMatcher },

  #[error("request body path '{0}' does not resolve against the input message")]
  UnresolvedRequestPath(String),

  #[error("response body path '{0}' does not resolve against the output message")]
  UnresolvedResponsePath(String),

  #[error("value at '{path}' has type {actual}, but the field requires {expected}")]
  TypeMismatch { path: String, expected: &'static str, actual: &'static str },
}

/// Errors raised while synthesizing a response body.
#[derive(Debug, Error)]
pub enum ResponseSynthesisError {
  #[error("cannot set '{path}': {reason}")]
  PathConflict { path: String, reason: String },

  #[error("failed to convert synthesized JSON into the output message: {0}")]
  Unmarshal(String),
}
