//! Directory Loader (§4.K) — the two filesystem scans rooted at `DATA_DIR`
//! that feed the Descriptor Registry and the Mapping Table.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use prost::Message;
use prost_types::FileDescriptorSet;

use crate::error::MockServerError;
use crate::mapping::{MappingFile, MappingSpec};

/// Read every regular file under `DATA_DIR/descriptors` whose extension
/// matches one of `extensions`, decoding each as a `FileDescriptorSet`. An
/// empty or missing directory, or a file that fails to decode, is fatal.
pub fn load_descriptor_sets(data_dir: &str, extensions: &[String]) -> Result<Vec<FileDescriptorSet>, MockServerError> {
  let dir = Path::new(data_dir).join("descriptors");
  let files = list_files_with_extensions(&dir, extensions)
    .map_err(|reason| MockServerError::DescriptorLoad { file: dir.display().to_string(), reason })?;

  if files.is_empty() {
    return Err(MockServerError::DescriptorLoad {
      file: dir.display().to_string(),
      reason: "no descriptor files found".to_string(),
    });
  }

  files.into_iter().map(|path| {
    let bytes = std::fs::read(&path)
      .map_err(|err| MockServerError::DescriptorLoad { file: path.display().to_string(), reason: err.to_string() })?;
    FileDescriptorSet::decode(bytes.as_slice())
      .map_err(|err| MockServerError::DescriptorLoad { file: path.display().to_string(), reason: err.to_string() })
  }).collect()
}

/// Read and flatten every `.json` file under `DATA_DIR/mappings` into one
/// list of [`MappingSpec`]s. A missing directory is treated as "no
/// mappings yet" (not fatal) so a fresh deployment can add them later via
/// hot-reload; a file that fails to parse is fatal.
pub fn load_mapping_specs(data_dir: &str) -> Result<Vec<MappingSpec>, MockServerError> {
  let dir = Path::new(data_dir).join("mappings");
  if !dir.exists() {
    return Ok(vec![]);
  }

  let files = list_files_with_extensions(&dir, &["json".to_string()])
    .map_err(|reason| MockServerError::MappingSyntax { file: dir.display().to_string(), reason })?;

  let mut specs = Vec::new();
  for path in files {
    let text = std::fs::read_to_string(&path)
      .map_err(|err| MockServerError::MappingSyntax { file: path.display().to_string(), reason: err.to_string() })?;
    let file: MappingFile = serde_json::from_str(&text)
      .map_err(|err| MockServerError::MappingSyntax { file: path.display().to_string(), reason: err.to_string() })?;
    specs.extend(file.into_specs());
  }
  Ok(specs)
}

/// List regular files directly under `dir` whose extension (without the
/// leading dot) matches one of `extensions` (also given without the dot,
/// or with — both are normalized).
fn list_files_with_extensions(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, String> {
  let normalized: Vec<String> = extensions.iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect();

  let entries = std::fs::read_dir(dir).map_err(|err| err.to_string())?;
  let mut matched = Vec::new();
  for entry in entries {
    let entry = entry.map_err(|err| err.to_string())?;
    let path = entry.path();
    if !path.is_file() {
      continue;
    }
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else { continue };
    if normalized.iter().any(|want| want == &ext.to_lowercase()) {
      matched.push(path);
    }
  }
  // Sorted so that load order (and therefore registration/flatten order) is
  // deterministic across platforms with differing readdir ordering.
  Ok(matched.into_iter().sorted().collect())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message::test_support::compile_descriptor_set;

  #[test]
  fn missing_mappings_directory_is_empty_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let specs = load_mapping_specs(dir.path().to_str().unwrap()).unwrap();
    assert!(specs.is_empty());
  }

  #[test]
  fn loads_single_and_array_mapping_files() {
    let dir = tempfile::tempdir().unwrap();
    let mappings_dir = dir.path().join("mappings");
    std::fs::create_dir_all(&mappings_dir).unwrap();
    std::fs::write(mappings_dir.join("one.json"), r#"{"endpoint": "demo.Echo/Say"}"#).unwrap();
    std::fs::write(mappings_dir.join("many.json"), r#"[{"endpoint": "demo.Echo/Say"}, {"endpoint": "demo.Echo/Other"}]"#).unwrap();

    let specs = load_mapping_specs(dir.path().to_str().unwrap()).unwrap();
    assert_eq!(specs.len(), 3);
  }

  #[test]
  fn malformed_mapping_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mappings_dir = dir.path().join("mappings");
    std::fs::create_dir_all(&mappings_dir).unwrap();
    std::fs::write(mappings_dir.join("broken.json"), "not json").unwrap();

    assert!(load_mapping_specs(dir.path().to_str().unwrap()).is_err());
  }

  #[test]
  fn missing_descriptors_directory_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_descriptor_sets(dir.path().to_str().unwrap(), &[".pb".to_string()]).is_err());
  }

  #[test]
  fn loads_descriptor_sets_matching_extension() {
    let dir = tempfile::tempdir().unwrap();
    let descriptors_dir = dir.path().join("descriptors");
    std::fs::create_dir_all(&descriptors_dir).unwrap();

    let fds = compile_descriptor_set(r#"
      syntax = "proto3";
      package demo;
      message EchoReq { string msg = 1; }
      service Echo { rpc Say(EchoReq) returns (EchoReq); }
    "#);
    std::fs::write(descriptors_dir.join("demo.pb"), fds.encode_to_vec()).unwrap();
    std::fs::write(descriptors_dir.join("ignored.txt"), b"not a descriptor").unwrap();

    let sets = load_descriptor_sets(dir.path().to_str().unwrap(), &[".pb".to_string()]).unwrap();
    assert_eq!(sets.len(), 1);
  }
}
