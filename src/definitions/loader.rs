// Definition loader - recursive YAML discovery with content checksums

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::models::DomainDefinition;
use crate::{Result, SwitchboardError};

/// Loads domain definitions from one or more directory trees.
///
/// Any I/O or parse failure aborts the load with the offending path; a batch
/// either loads completely or not at all, so a reload can never half-apply.
#[derive(Debug, Clone, Default)]
pub struct DefinitionLoader {
    dirs: Vec<PathBuf>,
}

impl DefinitionLoader {
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        DefinitionLoader {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Walk every configured directory and parse all definition files.
    ///
    /// Files are selected by extension (`.yaml` / `.yml`), visited in path
    /// order for deterministic output, and annotated with their source path
    /// and the SHA-256 of their raw bytes.
    pub fn load_all(&self) -> Result<Vec<DomainDefinition>> {
        let mut files = Vec::new();
        for dir in &self.dirs {
            for entry in WalkDir::new(dir).sort_by_file_name() {
                let entry = entry.map_err(|e| SwitchboardError::LoadError {
                    path: e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| dir.display().to_string()),
                    message: e.to_string(),
                })?;
                if entry.file_type().is_file() && is_definition_file(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        }
        files.sort();

        let mut definitions = Vec::with_capacity(files.len());
        for path in files {
            definitions.push(load_file(&path)?);
        }
        info!(count = definitions.len(), "loaded domain definitions");
        Ok(definitions)
    }
}

fn is_definition_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn load_file(path: &Path) -> Result<DomainDefinition> {
    let display_path = path.display().to_string();
    let raw = std::fs::read(path).map_err(|e| SwitchboardError::LoadError {
        path: display_path.clone(),
        message: e.to_string(),
    })?;

    let mut definition: DomainDefinition =
        serde_yaml::from_slice(&raw).map_err(|e| SwitchboardError::LoadError {
            path: display_path.clone(),
            message: e.to_string(),
        })?;

    definition.source_file = display_path.clone();
    definition.checksum = hex_digest(&raw);
    debug!(domain = %definition.domain, file = %display_path, "parsed definition");
    Ok(definition)
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MINIMAL: &str = "domain: invoices\nversion: 1.0.0\n";

    fn write(dir: &TempDir, rel: &str, contents: &str) {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_loads_recursively_and_attaches_checksum() {
        let dir = TempDir::new().unwrap();
        write(&dir, "invoices.yaml", MINIMAL);
        write(&dir, "nested/orders.yml", "domain: orders\nversion: 2.0.0\n");
        write(&dir, "ignored.txt", "not yaml");

        let defs = DefinitionLoader::new([dir.path()]).load_all().unwrap();
        assert_eq!(defs.len(), 2);

        let invoices = defs.iter().find(|d| d.domain == "invoices").unwrap();
        assert_eq!(invoices.checksum.len(), 64);
        assert!(invoices.source_file.ends_with("invoices.yaml"));
    }

    #[test]
    fn test_checksum_is_stable_across_loads() {
        let dir = TempDir::new().unwrap();
        write(&dir, "invoices.yaml", MINIMAL);

        let loader = DefinitionLoader::new([dir.path()]);
        let first = loader.load_all().unwrap();
        let second = loader.load_all().unwrap();
        assert_eq!(first[0].checksum, second[0].checksum);
    }

    #[test]
    fn test_parse_error_reports_offending_path() {
        let dir = TempDir::new().unwrap();
        write(&dir, "broken.yaml", "domain: [unclosed");

        let err = DefinitionLoader::new([dir.path()]).load_all().unwrap_err();
        match err {
            SwitchboardError::LoadError { path, .. } => {
                assert!(path.ends_with("broken.yaml"));
            }
            other => panic!("expected LoadError, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_directory_is_a_load_error() {
        let err = DefinitionLoader::new(["/definitely/not/here"])
            .load_all()
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::LoadError { .. }));
    }
}
