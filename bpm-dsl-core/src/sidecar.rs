//! Sidecar OpenAPI document handling.
//!
//! The compiler reads exactly two things from the sidecar: that it exists
//! next to the `.bpm` source (same stem, `.yaml` or `.yml`), and the set of
//! schema names under `components.schemas`. Everything else in the document
//! is opaque.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::CompileError;

/// Find the sidecar for a `.bpm` source file.
///
/// Checks `<stem>.yaml` then `<stem>.yml` in the source file's directory.
pub fn locate(source_path: &Path) -> Result<PathBuf, CompileError> {
    let stem = source_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    for ext in ["yaml", "yml"] {
        let candidate = source_path.with_extension(ext);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    Err(CompileError::MissingOpenApi { stem })
}

/// The portion of the sidecar the compiler cares about.
#[derive(Debug, Clone)]
pub struct OpenApiSidecar {
    pub path: PathBuf,
    /// Names under `components.schemas`, empty when the document has none.
    pub schema_names: BTreeSet<String>,
}

impl OpenApiSidecar {
    /// Load a sidecar document and extract its schema names.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read sidecar '{}'", path.display()))?;
        let doc: serde_yaml::Value = serde_yaml::from_str(&text)
            .with_context(|| format!("sidecar '{}' is not valid YAML", path.display()))?;

        let schema_names = doc
            .get("components")
            .and_then(|c| c.get("schemas"))
            .and_then(|s| s.as_mapping())
            .map(|m| {
                m.keys()
                    .filter_map(|k| k.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self { path, schema_names })
    }

    pub fn has_schema(&self, name: &str) -> bool {
        self.schema_names.contains(name)
    }
}
