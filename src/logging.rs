//! Logging (§4.M) — one-time `tracing-subscriber` initialization, switched
//! between JSON and compact text formatting by `LOG_JSON_FORMAT`, filtered
//! by `LOG_LEVEL` through an `EnvFilter`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ResolvedConfig;

/// Install the global tracing subscriber. Must be called exactly once,
/// before any other module emits a span or event.
pub fn init(config: &ResolvedConfig) {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string().to_lowercase()));

  let registry = tracing_subscriber::registry().with(filter);

  if config.log_json_format {
    registry.with(fmt::layer().json().with_current_span(true).with_span_list(false)).init();
  } else {
    registry.with(fmt::layer().compact()).init();
  }
}
