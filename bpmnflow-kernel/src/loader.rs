//! Loads model files from a directory into a resolver.

use crate::config::ModelsConfig;
use crate::error::KernelError;
use bpmnflow_core::{ModelGraph, ModelResolver};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Summary of a directory load.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadReport {
    /// Versions registered or replaced.
    pub loaded: Vec<String>,
    /// Versions whose content was already registered.
    pub unchanged: Vec<String>,
    /// Files that could not be loaded, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

impl LoadReport {
    pub fn total(&self) -> usize {
        self.loaded.len() + self.unchanged.len()
    }
}

/// Registers every `*.json` model in the configured directory, in file-name order.
///
/// A missing directory loads nothing. Invalid files are skipped with a
/// warning unless `fail_on_invalid` is set.
pub fn load_models(
    resolver: &ModelResolver,
    config: &ModelsConfig,
) -> Result<LoadReport, KernelError> {
    let mut report = LoadReport::default();
    let dir = &config.dir;
    if !dir.exists() {
        tracing::warn!("Model directory {} does not exist", dir.display());
        return Ok(report);
    }

    let dir_error = |e: std::io::Error| KernelError::ModelFile {
        path: dir.clone(),
        reason: e.to_string(),
    };
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(dir_error)? {
        let path = entry.map_err(dir_error)?.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        match load_file(resolver, &path) {
            Ok((version, true)) => report.loaded.push(version),
            Ok((version, false)) => report.unchanged.push(version),
            Err(reason) if config.fail_on_invalid => {
                return Err(KernelError::ModelFile { path, reason });
            }
            Err(reason) => {
                tracing::warn!("Skipping model file {}: {}", path.display(), reason);
                report.skipped.push((path, reason));
            }
        }
    }

    tracing::info!(
        "Model load complete: {} loaded, {} unchanged, {} skipped",
        report.loaded.len(),
        report.unchanged.len(),
        report.skipped.len()
    );
    Ok(report)
}

fn load_file(resolver: &ModelResolver, path: &Path) -> Result<(String, bool), String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let json: serde_json::Value =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| e.to_string())?;
    let graph = ModelGraph::from_json(&json).map_err(|e| e.to_string())?;
    let version = graph.version().to_string();
    let changed = resolver.add_model(graph).map_err(|e| e.to_string())?;
    Ok((version, changed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn model(version: &str) -> String {
        json!({
            "version": version,
            "processes": [{"id": "p1", "name": "Order"}],
            "elements": [
                {"id": "t1", "kind": "task", "name": "New", "process": "p1", "task": {"id": 100}}
            ],
            "flows": []
        })
        .to_string()
    }

    fn config(dir: &Path, fail_on_invalid: bool) -> ModelsConfig {
        ModelsConfig {
            dir: dir.to_path_buf(),
            fail_on_invalid,
        }
    }

    #[test]
    fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.json"), model("order-1.1")).unwrap();
        fs::write(dir.path().join("a.json"), model("order-1.0")).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a model").unwrap();

        let resolver = ModelResolver::new();
        let report = load_models(&resolver, &config(dir.path(), false)).unwrap();
        assert_eq!(report.loaded, vec!["order-1.0", "order-1.1"]);
        assert_eq!(resolver.versions(), vec!["order-1.0", "order-1.1"]);

        let report = load_models(&resolver, &config(dir.path(), false)).unwrap();
        assert_eq!(report.unchanged.len(), 2);
        assert_eq!(report.total(), 2);
    }

    #[test]
    fn test_invalid_file_skipped_or_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.json"), model("order-1.0")).unwrap();
        fs::write(dir.path().join("bad.json"), r#"{"version": ""}"#).unwrap();

        let resolver = ModelResolver::new();
        let report = load_models(&resolver, &config(dir.path(), false)).unwrap();
        assert_eq!(report.loaded, vec!["order-1.0"]);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].0.ends_with("bad.json"));

        let err = load_models(&ModelResolver::new(), &config(dir.path(), true)).unwrap_err();
        assert_eq!(err.error_code(), "MODEL_FILE_ERROR");
    }

    #[test]
    fn test_missing_directory_loads_nothing() {
        let resolver = ModelResolver::new();
        let report = load_models(&resolver, &config(Path::new("/nonexistent/models"), true)).unwrap();
        assert_eq!(report, LoadReport::default());
    }
}
