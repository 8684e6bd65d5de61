//! Install manifest (`.manifest.json`)
//!
//! Written at the end of a successful install; read back by `doctor`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = ".manifest.json";

/// Record of what one install run put on disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    pub installed_at: String,
    pub files: Vec<ManifestFile>,
}

/// An installed file and the sha256 of the bytes that were written
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestFile {
    pub path: PathBuf,
    pub sha256: String,
}

impl Manifest {
    pub fn new(version: impl Into<String>, files: Vec<ManifestFile>) -> Self {
        Self {
            version: version.into(),
            installed_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            files,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Pretty JSON with a trailing newline
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)? + "\n")
    }

    /// Same version and same file hashes, ignoring the timestamp
    pub fn same_contents(&self, other: &Manifest) -> bool {
        self.version == other.version && self.files == other.files
    }

    /// Recorded files whose current bytes no longer match (missing counts as modified)
    pub fn modified_files(&self) -> Vec<&ManifestFile> {
        self.files
            .iter()
            .filter(|f| match std::fs::read(&f.path) {
                Ok(bytes) => crate::install::atomic::sha256_hex(&bytes) != f.sha256,
                Err(_) => true,
            })
            .collect()
    }
}
