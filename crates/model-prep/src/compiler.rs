use std::path::Path;

use async_trait::async_trait;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::artifacts::ModelArtifacts;
use crate::catalog::ModelCatalogEntry;
use crate::downloader::ProgressFn;
use crate::error::PrepError;

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Turns downloaded files into a model that is ready for transcription.
///
/// Instances hold whatever resources compilation needs and are created per
/// model, separate from the instance used for live transcription.
#[async_trait]
pub trait ModelCompiler: Send {
    async fn compile(
        &mut self,
        entry: &ModelCatalogEntry,
        model_dir: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<(), PrepError>;

    /// Release everything held by this instance.
    fn unload(&mut self);
}

/// Creates a fresh compiler for each model.
pub trait CompilerFactory: Send + Sync {
    fn create(&self) -> Box<dyn ModelCompiler>;
}

/// Verifies SHA-256 checksums and records a preparation manifest.
pub struct ChecksumCompiler {
    artifacts: ModelArtifacts,
    /// Model currently held by this instance
    loaded: Option<String>,
}

impl ChecksumCompiler {
    pub fn new(artifacts: ModelArtifacts) -> Self {
        Self {
            artifacts,
            loaded: None,
        }
    }

    /// Hash a file, reporting bytes read through `on_read`.
    async fn sha256_file(path: &Path, mut on_read: impl FnMut(u64)) -> Result<String, PrepError> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let bytes_read = file.read(&mut buffer).await?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
            on_read(bytes_read as u64);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[async_trait]
impl ModelCompiler for ChecksumCompiler {
    async fn compile(
        &mut self,
        entry: &ModelCatalogEntry,
        model_dir: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<(), PrepError> {
        self.loaded = Some(entry.name.clone());
        info!("Preparing model '{}'", entry.name);

        let total = entry.size_bytes().max(1);
        let mut done = 0u64;

        for file in &entry.files {
            let path = model_dir.join(&file.filename);
            if !path.is_file() {
                return Err(PrepError::MissingFile(file.filename.clone()));
            }

            let Some(expected) = &file.sha256 else {
                debug!("No checksum for {}, skipping verification", file.filename);
                done += file.size_bytes;
                progress((done as f64 / total as f64).min(1.0));
                continue;
            };

            let actual = Self::sha256_file(&path, |n| {
                done += n;
                progress((done as f64 / total as f64).min(1.0));
            })
            .await?;

            if &actual != expected {
                // Drop the bad file so the next run downloads it again
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove corrupt file {:?}: {}", path, e);
                }
                return Err(PrepError::ChecksumMismatch {
                    filename: file.filename.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        self.artifacts.write_manifest(entry)?;
        progress(1.0);
        info!("Model '{}' prepared", entry.name);
        Ok(())
    }

    fn unload(&mut self) {
        if let Some(name) = self.loaded.take() {
            debug!("Unloaded compiler instance for '{}'", name);
        }
    }
}

/// Factory for [`ChecksumCompiler`] instances
#[derive(Debug, Clone)]
pub struct ChecksumCompilerFactory {
    artifacts: ModelArtifacts,
}

impl ChecksumCompilerFactory {
    pub fn new(artifacts: ModelArtifacts) -> Self {
        Self { artifacts }
    }
}

impl CompilerFactory for ChecksumCompilerFactory {
    fn create(&self) -> Box<dyn ModelCompiler> {
        Box::new(ChecksumCompiler::new(self.artifacts.clone()))
    }
}
