//! Binary entry point: load configuration, build the Descriptor Registry
//! and initial Mapping Table, then serve until a shutdown signal arrives.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use grpc_mock_server::config::{Config, ResolvedConfig};
use grpc_mock_server::error::MockServerError;
use grpc_mock_server::mapping::Mapping;
use grpc_mock_server::registry::DescriptorRegistry;
use grpc_mock_server::table::MappingTable;
use grpc_mock_server::{loader, logging, server, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
  let config = Config::parse();
  let resolved = match ResolvedConfig::resolve(&config) {
    Ok(resolved) => resolved,
    Err(err) => {
      eprintln!("configuration error: {err}");
      return ExitCode::FAILURE;
    }
  };

  logging::init(&resolved);
  info!(
    version = grpc_mock_server::built_info::PKG_VERSION,
    "starting grpc-mock-server",
  );

  if let Err(err) = run(resolved).await {
    error!(%err, "fatal error");
    return ExitCode::FAILURE;
  }

  ExitCode::SUCCESS
}

async fn run(config: ResolvedConfig) -> Result<(), MockServerError> {
  let descriptor_sets = loader::load_descriptor_sets(&config.data_dir, &config.descriptor_extensions)?;
  let registry = Arc::new(DescriptorRegistry::load(descriptor_sets, config.grpc_ignore_duplicate_service)?);
  info!(services = registry.services().len(), "descriptor registry loaded");

  let mapping_specs = loader::load_mapping_specs(&config.data_dir)?;
  let mut mappings = Vec::with_capacity(mapping_specs.len());
  for spec in mapping_specs {
    let endpoint = spec.endpoint.clone();
    let mapping = Mapping::from_spec(spec)
      .map_err(|err| MockServerError::MappingSemantic { id: String::new(), endpoint, reason: err.to_string() })?;
    mappings.push(mapping);
  }

  let table = Arc::new(MappingTable::new());
  table.set_mappings(mappings, &registry).map_err(|(id, endpoint, err)| {
    MockServerError::MappingSemantic { id, endpoint, reason: err.to_string() }
  })?;
  info!("initial mapping table installed");

  let cancel = CancellationToken::new();
  let watch_handle = if config.watch_mappings_changes {
    info!("mapping hot-reload enabled");
    let data_dir = config.data_dir.clone();
    let registry = registry.clone();
    let table = table.clone();
    let cancel = cancel.clone();
    Some(tokio::spawn(watch::run(data_dir, registry, table, cancel)))
  } else {
    None
  };

  let addr = std::net::SocketAddr::new(config.grpc_host, config.grpc_port);
  let shutdown = {
    let cancel = cancel.clone();
    async move {
      let _ = tokio::signal::ctrl_c().await;
      cancel.cancel();
    }
  };

  let result = server::serve(addr, &config, &registry, table, shutdown).await;

  cancel.cancel();
  if let Some(handle) = watch_handle {
    let _ = handle.await;
  }

  result
}
