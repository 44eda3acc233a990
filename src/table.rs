//! Mapping Table (§4.F) — the live, swappable set of mappings, keyed by
//! endpoint, that the Dispatch Handler consults on every call.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::ValidationError;
use crate::mapping::Mapping;
use crate::registry::DescriptorRegistry;
use crate::validator::validate;

/// Snapshot of mappings for one endpoint, in input order. The Dispatch
/// Handler scans this in reverse so the most-recently-supplied mapping
/// wins ties (§4.F, §5 "Ordering").
type Bucket = Vec<Arc<Mapping>>;

/// Thread-safe, replace-all-atomic mapping store (§4.F, §5 "Shared state").
/// Readers take a cheap `Arc` snapshot of the whole table and then iterate
/// it lock-free; writers build a brand new table and swap it in under the
/// lock only for the instant of the swap.
#[derive(Debug, Default)]
pub struct MappingTable {
  inner: RwLock<Arc<HashMap<String, Bucket>>>,
}

impl MappingTable {
  pub fn new() -> MappingTable {
    MappingTable { inner: RwLock::new(Arc::new(HashMap::new())) }
  }

  /// Validate every mapping in `mappings` against `registry` first,
  /// rejecting the whole batch (naming the offending mapping) on any
  /// failure, then atomically swap it in as the live table.
  pub fn set_mappings(&self, mappings: Vec<Mapping>, registry: &DescriptorRegistry) -> Result<(), (String, String, ValidationError)> {
    for mapping in &mappings {
      if let Err(err) = validate(mapping, registry) {
        return Err((mapping.id.clone(), mapping.path(), err));
      }
    }

    let mut grouped: HashMap<String, Bucket> = HashMap::new();
    for mapping in mappings {
      grouped.entry(mapping.path()).or_default().push(Arc::new(mapping));
    }

    let snapshot = Arc::new(grouped);
    let mut guard = self.inner.write().expect("mapping table lock poisoned");
    *guard = snapshot;
    Ok(())
  }

  /// Take a lock-free snapshot of the live table.
  pub fn snapshot(&self) -> Arc<HashMap<String, Bucket>> {
    self.inner.read().expect("mapping table lock poisoned").clone()
  }

  /// §4.I `Selecting`: find the most-recently-supplied mapping for `path`
  /// whose matchers are all satisfied, scanning newest-first. Distinguishes
  /// "no mappings registered for this endpoint at all" from "mappings
  /// exist, none matched" so the Dispatch Handler can pick the right
  /// `FAILED_PRECONDITION` reason.
  pub fn select_for(&self, path: &str, metadata: &IndexMap<String, String>, body: &Value) -> SelectResult {
    let table = self.snapshot();
    let Some(bucket) = table.get(path) else { return SelectResult::NoMappingsForEndpoint };
    match bucket.iter().rev().find(|mapping| mapping.matches(metadata, body)) {
      Some(mapping) => SelectResult::Matched(mapping.clone()),
      None => SelectResult::NoMatch,
    }
  }
}

/// Outcome of a Mapping Table lookup (§4.I `Selecting`).
pub enum SelectResult {
  NoMappingsForEndpoint,
  NoMatch,
  Matched(Arc<Mapping>),
}
