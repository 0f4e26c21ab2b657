//! Persisted language preference
//!
//! A small JSON file holding one value under the `language` key. Read once at
//! startup, rewritten on every change.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::types::Result;

#[derive(Debug, Serialize, Deserialize)]
struct PreferenceFile {
    language: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LanguagePreference {
    path: PathBuf,
}

impl LanguagePreference {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored language, if any. A missing or unreadable file counts as unset.
    pub fn load(&self) -> Option<String> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str::<PreferenceFile>(&contents) {
            Ok(file) => file.language.filter(|l| !l.is_empty()),
            Err(e) => {
                warn!("Ignoring malformed {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn store(&self, language: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = PreferenceFile {
            language: Some(language.to_string()),
        };
        std::fs::write(&self.path, serde_json::to_vec_pretty(&file)?)?;
        debug!("Saved language '{}' to {}", language, self.path.display());
        Ok(())
    }
}
