use std::path::PathBuf;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::catalog::ModelCatalogEntry;
use crate::error::PrepError;

/// Written next to the model files once preparation succeeded.
pub const MANIFEST_FILENAME: &str = "prepared.json";

/// Record of a completed preparation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedManifest {
    pub model_name: String,
    pub files: Vec<String>,
    pub prepared_at: DateTime<Utc>,
}

/// On-disk layout of models: `models_dir/{model_name}/{files}`.
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    models_dir: PathBuf,
}

impl ModelArtifacts {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn model_dir(&self, entry: &ModelCatalogEntry) -> PathBuf {
        self.models_dir.join(&entry.name)
    }

    pub fn manifest_path(&self, entry: &ModelCatalogEntry) -> PathBuf {
        self.model_dir(entry).join(MANIFEST_FILENAME)
    }

    /// Are all model files downloaded (regardless of preparation)?
    pub fn is_downloaded(&self, entry: &ModelCatalogEntry) -> bool {
        let dir = self.model_dir(entry);
        dir.is_dir() && entry.files.iter().all(|f| dir.join(&f.filename).is_file())
    }

    /// Are all model files present and was preparation recorded?
    pub fn is_prepared(&self, entry: &ModelCatalogEntry) -> bool {
        self.is_downloaded(entry) && self.manifest_path(entry).is_file()
    }

    pub fn write_manifest(&self, entry: &ModelCatalogEntry) -> Result<PreparedManifest, PrepError> {
        let manifest = PreparedManifest {
            model_name: entry.name.clone(),
            files: entry.files.iter().map(|f| f.filename.clone()).collect(),
            prepared_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| PrepError::Compile(format!("Failed to encode manifest: {}", e)))?;
        std::fs::write(self.manifest_path(entry), bytes)?;
        Ok(manifest)
    }

    /// Delete everything stored for a model.
    pub fn remove(&self, entry: &ModelCatalogEntry) -> Result<(), PrepError> {
        let dir = self.model_dir(entry);
        if dir.is_dir() {
            std::fs::remove_dir_all(&dir)?;
            info!("Deleted model directory {:?}", dir);
        } else {
            warn!("Model '{}' has no files to delete", entry.name);
        }
        Ok(())
    }
}
