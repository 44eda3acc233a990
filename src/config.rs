//! Environment-variable configuration (§6 of the specification).
//!
//! Every setting is optional and has a documented default, so `Config::parse`
//! never requires arguments on the command line — it is driven entirely by
//! `clap`'s `env` feature reading the process environment, the same approach
//! used for the CLI surface in the wider gRPC tooling in this workspace's
//! lineage.

use std::net::IpAddr;
use std::str::FromStr;

use clap::Parser;
use tracing::warn;

use crate::error::MockServerError;

#[derive(Parser, Debug, Clone)]
#[command(name = "grpc-mock-server", about = "Dynamic gRPC mock server")]
pub struct Config {
  /// Root containing `descriptors/` and `mappings/`.
  #[arg(long, env = "DATA_DIR", default_value = "/data")]
  pub data_dir: String,

  /// Comma-separated file suffixes recognized as descriptor sets.
  #[arg(long, env = "DESCRIPTOR_EXTENSIONS", default_value = ".pb")]
  pub descriptor_extensions: String,

  /// Enable hot-reload of the mappings directory.
  #[arg(long, env = "WATCH_MAPPINGS_CHANGES", default_value = "false")]
  pub watch_mappings_changes: String,

  /// Listen address.
  #[arg(long, env = "GRPC_HOST", default_value = "0.0.0.0")]
  pub grpc_host: String,

  /// Listen port.
  #[arg(long, env = "GRPC_PORT", default_value = "5675")]
  pub grpc_port: String,

  /// Enable the gRPC reflection service.
  #[arg(long, env = "GRPC_SERVER_REFLECTION", default_value = "false")]
  pub grpc_server_reflection: String,

  /// Skip rather than reject duplicate service FQNs.
  #[arg(long, env = "GRPC_IGNORE_DUPLICATE_SERVICE", default_value = "false")]
  pub grpc_ignore_duplicate_service: String,

  /// Tolerate unknown fields when parsing synthesized responses.
  #[arg(long, env = "GRPC_DISCARD_UNKNOWN_FIELDS", default_value = "false")]
  pub grpc_discard_unknown_fields: String,

  /// `debug`/`info`/`warn`/`error`.
  #[arg(long, env = "LOG_LEVEL", default_value = "info")]
  pub log_level: String,

  /// JSON structured logs (else text).
  #[arg(long, env = "LOG_JSON_FORMAT", default_value = "true")]
  pub log_json_format: String,
}

/// Validated, typed view of [`Config`] as actually consumed by the rest of
/// the crate. Built with [`ResolvedConfig::resolve`].
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
  pub data_dir: String,
  pub descriptor_extensions: Vec<String>,
  pub watch_mappings_changes: bool,
  pub grpc_host: IpAddr,
  pub grpc_port: u16,
  pub grpc_server_reflection: bool,
  pub grpc_ignore_duplicate_service: bool,
  pub grpc_discard_unknown_fields: bool,
  pub log_level: tracing::Level,
  pub log_json_format: bool,
}

impl ResolvedConfig {
  pub fn resolve(config: &Config) -> Result<ResolvedConfig, MockServerError> {
    let descriptor_extensions: Vec<String> = config.descriptor_extensions
      .split(',')
      .map(|s| s.trim().to_string())
      .filter(|s| !s.is_empty())
      .collect();
    if descriptor_extensions.is_empty() {
      return Err(MockServerError::Config("DESCRIPTOR_EXTENSIONS must name at least one extension".to_string()));
    }

    let grpc_host = if config.grpc_host == "0.0.0.0" {
      IpAddr::from_str("0.0.0.0").unwrap()
    } else {
      IpAddr::from_str(config.grpc_host.as_str())
        .map_err(|err| MockServerError::Config(format!("GRPC_HOST '{}' is not a valid address: {}", config.grpc_host, err)))?
    };

    let grpc_port: u16 = config.grpc_port.parse()
      .map_err(|err| MockServerError::Config(format!("GRPC_PORT '{}' is not a valid port: {}", config.grpc_port, err)))?;

    let log_level = match config.log_level.to_lowercase().as_str() {
      "debug" => tracing::Level::DEBUG,
      "info" => tracing::Level::INFO,
      "warn" => tracing::Level::WARN,
      "error" => tracing::Level::ERROR,
      other => return Err(MockServerError::Config(format!("LOG_LEVEL '{}' must be one of debug/info/warn/error", other))),
    };

    Ok(ResolvedConfig {
      data_dir: config.data_dir.clone(),
      descriptor_extensions,
      watch_mappings_changes: parse_bool(&config.watch_mappings_changes, "WATCH_MAPPINGS_CHANGES", false),
      grpc_host,
      grpc_port,
      grpc_server_reflection: parse_bool(&config.grpc_server_reflection, "GRPC_SERVER_REFLECTION", false),
      grpc_ignore_duplicate_service: parse_bool(&config.grpc_ignore_duplicate_service, "GRPC_IGNORE_DUPLICATE_SERVICE", false),
      grpc_discard_unknown_fields: parse_bool(&config.grpc_discard_unknown_fields, "GRPC_DISCARD_UNKNOWN_FIELDS", false),
      log_level,
      log_json_format: parse_bool(&config.log_json_format, "LOG_JSON_FORMAT", true),
    })
  }
}

fn parse_bool(value: &str, name: &str, default: bool) -> bool {
  match value.to_lowercase().as_str() {
    "true" | "1" | "yes" => true,
    "false" | "0" | "no" => false,
    other => {
      warn!("'{}' is not a valid boolean for {}, defaulting to {}", other, name, default);
      default
    }
  }
}
