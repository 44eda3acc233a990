//! Descriptor Registry (§4.C) — ingests `FileDescriptorSet` blobs and
//! materializes the service surface for services compiled into nobody's
//! binary but this mock server's.

use std::collections::{HashMap, HashSet};

use prost_reflect::{DescriptorPool, MessageDescriptor, MethodDescriptor};
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use tracing::{instrument, warn};

use crate::error::MockServerError;

/// One RPC method as exposed by the registry (§3 `MethodEntry`).
#[derive(Debug, Clone)]
pub struct MethodEntry {
  pub name: String,
  pub input_type_fqn: String,
  pub output_type_fqn: Option<String>,
  pub input_desc: MessageDescriptor,
  pub output_desc: Option<MessageDescriptor>,
  pub client_streaming: bool,
  pub server_streaming: bool,
}

/// One gRPC service as exposed by the registry (§3 `ServiceEntry`).
#[derive(Debug, Clone)]
pub struct ServiceEntry {
  pub fqn: String,
  pub file_name: String,
  pub methods: Vec<MethodEntry>,
}

/// Process-wide descriptor registry. Built once at startup; read-only for
/// the rest of the process lifetime (§5).
#[derive(Debug, Clone)]
pub struct DescriptorRegistry {
  pool: DescriptorPool,
  services: Vec<ServiceEntry>,
}

impl DescriptorRegistry {
  pub fn pool(&self) -> &DescriptorPool {
    &self.pool
  }

  pub fn services(&self) -> &[ServiceEntry] {
    &self.services
  }

  pub fn find_method(&self, service_fqn: &str, method_name: &str) -> Option<&MethodEntry> {
    self.services.iter()
      .find(|s| s.fqn == service_fqn)
      .and_then(|s| s.methods.iter().find(|m| m.name == method_name))
  }

  /// Load every `FileDescriptorSet` into a single descriptor pool, in
  /// topologically sorted dependency order, skipping files that are
  /// already present. Registration failure anywhere is fatal for the whole
  /// call, per §4.C.
  #[instrument(skip(sets))]
  pub fn load(sets: Vec<FileDescriptorSet>, ignore_duplicate_service: bool) -> Result<DescriptorRegistry, MockServerError> {
    let mut pool = DescriptorPool::new();

    let all_files: Vec<FileDescriptorProto> = sets.into_iter().flat_map(|set| set.file).collect();
    let ordered = topo_sort(all_files)?;

    let mut registered_services: HashSet<String> = HashSet::new();

    for file in ordered {
      let file_name = file.name().to_string();
      if pool.get_file_by_name(&file_name).is_some() {
        continue;
      }

      let package = file.package().to_string();
      let fqns: Vec<String> = file.service.iter()
        .map(|s| qualify(&package, s.name()))
        .collect();

      if let Some(dup) = fqns.iter().find(|fqn| registered_services.contains(*fqn)) {
        if ignore_duplicate_service {
          warn!("service '{}' is already registered, skipping file '{}'", dup, file_name);
          continue;
        } else {
          return Err(MockServerError::DuplicateService { service: dup.clone() });
        }
      }

      pool.add_file_descriptor_proto(file)
        .map_err(|err| MockServerError::DescriptorLoad { file: file_name.clone(), reason: err.to_string() })?;

      for fqn in fqns {
        registered_services.insert(fqn);
      }
    }

    let services = build_service_entries(&pool);
    Ok(DescriptorRegistry { pool, services })
  }
}

fn qualify(package: &str, name: &str) -> String {
  if package.is_empty() {
    name.to_string()
  } else {
    format!("{}.{}", package, name)
  }
}

fn build_service_entries(pool: &DescriptorPool) -> Vec<ServiceEntry> {
  pool.services().map(|service| {
    let methods = service.methods().map(|method: MethodDescriptor| {
      let input_desc = method.input();
      let output_desc = Some(method.output());
      MethodEntry {
        name: method.name().to_string(),
        input_type_fqn: input_desc.full_name().to_string(),
        output_type_fqn: output_desc.as_ref().map(|d| d.full_name().to_string()),
        input_desc,
        output_desc,
        client_streaming: method.is_client_streaming(),
        server_streaming: method.is_server_streaming(),
      }
    }).collect();

    ServiceEntry {
      fqn: service.full_name().to_string(),
      file_name: service.parent_file().name().to_string(),
      methods,
    }
  }).collect()
}

/// Kahn/DFS topological sort of the union of all descriptor-set files, by
/// declared `dependency` edges. A dependency that is never present in the
/// union and is not one of the well-known `google/protobuf/*.proto` types
/// (which `prost-reflect` bundles by default) is a fatal
/// [`MockServerError::MissingDependency`].
fn topo_sort(files: Vec<FileDescriptorProto>) -> Result<Vec<FileDescriptorProto>, MockServerError> {
  let mut by_name: HashMap<String, FileDescriptorProto> = HashMap::new();
  for file in files {
    by_name.entry(file.name().to_string()).or_insert(file);
  }

  let mut visited: HashSet<String> = HashSet::new();
  let mut visiting: HashSet<String> = HashSet::new();
  let mut order: Vec<FileDescriptorProto> = Vec::with_capacity(by_name.len());

  let names: Vec<String> = by_name.keys().cloned().collect();
  for name in names {
    visit(&name, &by_name, &mut visited, &mut visiting, &mut order)?;
  }

  Ok(order)
}

fn visit(
  name: &str,
  by_name: &HashMap<String, FileDescriptorProto>,
  visited: &mut HashSet<String>,
  visiting: &mut HashSet<String>,
  order: &mut Vec<FileDescriptorProto>,
) -> Result<(), MockServerError> {
  if visited.contains(name) {
    return Ok(());
  }
  if !visiting.insert(name.to_string()) {
    return Err(MockServerError::Other(anyhow::anyhow!("circular dependency involving '{}'", name)));
  }

  if let Some(file) = by_name.get(name) {
    for dep in &file.dependency {
      if by_name.contains_key(dep) {
        visit(dep, by_name, visited, visiting, order)?;
      } else if !dep.starts_with("google/protobuf/") {
        return Err(MockServerError::MissingDependency { dependency: dep.clone() });
      }
    }
    order.push(file.clone());
  }

  visiting.remove(name);
  visited.insert(name.to_string());
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message::test_support::compile_descriptor_set;
  use expectest::prelude::*;

  #[test]
  fn loads_a_simple_service() {
    let fds = compile_descriptor_set(r#"
      syntax = "proto3";
      package demo;
      message EchoReq { string msg = 1; }
      message EchoResp { string reply = 1; }
      service Echo { rpc Say(EchoReq) returns (EchoResp); }
    "#);

    let registry = DescriptorRegistry::load(vec![fds], false).unwrap();
    let method = registry.find_method("demo.Echo", "Say").unwrap();
    expect!(&method.input_type_fqn).to(be_equal_to("demo.EchoReq"));
    expect!(method.output_type_fqn.as_deref()).to(be_equal_to(Some("demo.EchoResp")));
  }

  #[test]
  fn duplicate_service_is_fatal_by_default() {
    let fds = compile_descriptor_set(r#"
      syntax = "proto3";
      package demo;
      message EchoReq { string msg = 1; }
      message EchoResp { string reply = 1; }
      service Echo { rpc Say(EchoReq) returns (EchoResp); }
    "#);

    let result = DescriptorRegistry::load(vec![fds.clone(), fds], false);
    // Same file registered twice: second copy is skipped (file already
    // present), so this should NOT be treated as a duplicate-service error.
    expect!(result).to(be_ok());
  }
}
