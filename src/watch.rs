//! Mapping Watcher (§4.L) — polls `DATA_DIR/mappings` for changes and
//! drives hot-reload of the Mapping Table. No filesystem-event crate is in
//! play here on purpose: a plain polling loop is the simplest thing that
//! satisfies the coalescing requirement from spec.md §9 ("hot-reload
//! races") without adding a dependency nothing else in this codebase uses.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::loader::load_mapping_specs;
use crate::mapping::Mapping;
use crate::registry::DescriptorRegistry;
use crate::table::MappingTable;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A snapshot of `DATA_DIR/mappings`'s entry set and mtimes, used to detect
/// whether anything changed since the last poll tick.
type Listing = BTreeMap<PathBuf, SystemTime>;

/// Run the watch loop until `cancel` fires. Every tick that observes a
/// listing/mtime delta since the previous tick re-runs the Directory
/// Loader for mappings only, validates the batch, and swaps it in on
/// success; failures are logged and the previous table is retained.
pub async fn run(data_dir: String, registry: Arc<DescriptorRegistry>, table: Arc<MappingTable>, cancel: CancellationToken) {
  let mappings_dir = Path::new(&data_dir).join("mappings");
  let mut last = snapshot(&mappings_dir);
  let mut ticker = interval(POLL_INTERVAL);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = cancel.cancelled() => {
        info!("mapping watcher shutting down");
        return;
      }
      _ = ticker.tick() => {
        let current = snapshot(&mappings_dir);
        if current == last {
          continue;
        }
        last = current;
        reload(&data_dir, &registry, &table);
      }
    }
  }
}

fn reload(data_dir: &str, registry: &DescriptorRegistry, table: &MappingTable) {
  let specs = match load_mapping_specs(data_dir) {
    Ok(specs) => specs,
    Err(err) => {
      error!(%err, "mapping hot-reload aborted: failed to read mappings directory");
      return;
    }
  };

  let mut mappings = Vec::with_capacity(specs.len());
  for spec in specs {
    match Mapping::from_spec(spec) {
      Ok(mapping) => mappings.push(mapping),
      Err(err) => {
        error!(%err, "mapping hot-reload aborted: a mapping failed to normalize");
        return;
      }
    }
  }

  match table.set_mappings(mappings, registry) {
    Ok(()) => info!("mapping hot-reload applied"),
    Err((id, endpoint, err)) => {
      error!(id = %id, endpoint = %endpoint, %err, "mapping hot-reload aborted: validation failed");
    }
  }
}

fn snapshot(dir: &Path) -> Listing {
  let mut out = Listing::new();
  let Ok(entries) = std::fs::read_dir(dir) else { return out };
  for entry in entries.flatten() {
    let path = entry.path();
    if let Ok(metadata) = entry.metadata() {
      if metadata.is_file() {
        out.insert(path, metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH));
      }
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn snapshot_of_missing_directory_is_empty() {
    let listing = snapshot(Path::new("/does/not/exist"));
    assert!(listing.is_empty());
  }

  #[test]
  fn snapshot_changes_when_a_file_is_added() {
    let dir = tempfile::tempdir().unwrap();
    let before = snapshot(dir.path());
    std::fs::write(dir.path().join("a.json"), "{}").unwrap();
    let after = snapshot(dir.path());
    assert_ne!(before, after);
  }
}
