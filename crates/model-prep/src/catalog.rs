use serde::{Deserialize, Serialize};

use crate::error::PrepError;

/// Name of the model that ships with the app and is always usable.
pub const BASELINE_MODEL: &str = "whisper-base";

/// Background models prepared after first launch, in processing order.
pub const DEFAULT_BACKGROUND_MODELS: &[&str] = &["whisper-small", "whisper-large-v3-turbo"];

/// Type of transcription model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Whisper,
    Parakeet,
}

/// Individual file within a model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelFile {
    /// Filename to save as
    pub filename: String,
    /// Download URL
    pub url: String,
    /// SHA-256 checksum (hex string). `None` skips verification.
    pub sha256: Option<String>,
    /// Expected size in bytes, used to weight download progress
    pub size_bytes: u64,
}

/// Static information about a model available for download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelCatalogEntry {
    /// Unique identifier, no spaces (e.g., "whisper-small")
    pub name: String,
    /// Human-readable name (e.g., "Whisper Small")
    pub display_name: String,
    pub description: String,
    pub model_type: ModelType,
    /// Approximate RAM usage when loaded in MB
    pub estimated_ram_mb: u64,
    pub files: Vec<ModelFile>,
}

impl ModelCatalogEntry {
    /// Total size on disk across all files
    pub fn size_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

/// The set of known models plus the ordered background list.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: Vec<ModelCatalogEntry>,
    baseline: String,
    background: Vec<String>,
}

impl ModelCatalog {
    /// Build a catalog from explicit parts.
    ///
    /// Every background name must be present in `entries` and must not be the baseline.
    pub fn new(
        entries: Vec<ModelCatalogEntry>,
        baseline: impl Into<String>,
        background: Vec<String>,
    ) -> Result<Self, PrepError> {
        let baseline = baseline.into();
        for name in &background {
            if name == &baseline {
                return Err(PrepError::BaselineInBackground(name.clone()));
            }
            if !entries.iter().any(|e| &e.name == name) {
                return Err(PrepError::ModelNotFound(name.clone()));
            }
        }

        Ok(Self {
            entries,
            baseline,
            background,
        })
    }

    /// Built-in catalog with the default background list.
    pub fn builtin() -> Self {
        Self {
            entries: builtin_entries(),
            baseline: BASELINE_MODEL.to_string(),
            background: DEFAULT_BACKGROUND_MODELS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Replace the background list, keeping entries and baseline.
    pub fn with_background(self, background: Vec<String>) -> Result<Self, PrepError> {
        Self::new(self.entries, self.baseline, background)
    }

    pub fn is_baseline(&self, name: &str) -> bool {
        self.baseline == name
    }

    pub fn find(&self, name: &str) -> Option<&ModelCatalogEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Background model names in processing order
    pub fn background_names(&self) -> &[String] {
        &self.background
    }

    /// Background model entries in processing order
    pub fn background_entries(&self) -> Vec<&ModelCatalogEntry> {
        self.background
            .iter()
            .filter_map(|name| self.find(name))
            .collect()
    }
}

fn whisper_entry(
    name: &str,
    display_name: &str,
    description: &str,
    filename: &str,
    sha256: Option<&str>,
    size_bytes: u64,
    estimated_ram_mb: u64,
) -> ModelCatalogEntry {
    ModelCatalogEntry {
        name: name.into(),
        display_name: display_name.into(),
        description: description.into(),
        model_type: ModelType::Whisper,
        estimated_ram_mb,
        files: vec![ModelFile {
            filename: filename.into(),
            url: format!(
                "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/{}",
                filename
            ),
            sha256: sha256.map(str::to_string),
            size_bytes,
        }],
    }
}

/// Hardcoded catalog of transcription models
/// Whisper SHA-256 hashes from: https://huggingface.co/ggerganov/whisper.cpp
fn builtin_entries() -> Vec<ModelCatalogEntry> {
    vec![
        // Bundled with the app, never downloaded by the background coordinator
        whisper_entry(
            "whisper-base",
            "Whisper Base",
            "Small bundled model, available immediately.",
            "ggml-base.bin",
            None,
            147_951_465, // ~141 MB
            300,
        ),
        whisper_entry(
            "whisper-small",
            "Whisper Small",
            "Fast, good for most use cases. Recommended for 8GB RAM.",
            "ggml-small.bin",
            Some("1be3a9b2063867b937e64e2ec7483364a79917e157fa98c5d94b5c1fffea987b"),
            487_601_967, // ~465 MB
            800,
        ),
        whisper_entry(
            "whisper-medium",
            "Whisper Medium",
            "Better accuracy, requires more RAM. Recommended for 16GB RAM.",
            "ggml-medium.bin",
            Some("6c14d5adee5f86394037b4e4e8b59f1673b6cee10e3cf0b11bbdbee79c156208"),
            1_533_763_059, // ~1.43 GB
            2200,
        ),
        whisper_entry(
            "whisper-large-v3-turbo",
            "Whisper Large v3 Turbo",
            "Fast large model variant. Recommended for 16GB RAM.",
            "ggml-large-v3-turbo.bin",
            Some("1fc70f774d38eb169993ac391eea357ef47c88757ef72ee5943879b7e8e2bc69"),
            1_624_555_275, // ~1.51 GB
            2500,
        ),
        ModelCatalogEntry {
            name: "parakeet-tdt-0.6b-v3-int8".into(),
            display_name: "Parakeet V3 INT8".into(),
            description: "Fast multilingual model optimized for CPU (25 languages).".into(),
            model_type: ModelType::Parakeet,
            estimated_ram_mb: 1200,
            files: vec![
                ModelFile {
                    filename: "encoder-model.int8.onnx".into(),
                    url: "https://huggingface.co/istupakov/parakeet-tdt-0.6b-v3-onnx/resolve/main/encoder-model.int8.onnx".into(),
                    sha256: Some("6139d2fa7e1b086097b277c7149725edbab89cc7c7ae64b23c741be4055aff09".into()),
                    size_bytes: 652_184_410,
                },
                ModelFile {
                    filename: "decoder_joint-model.int8.onnx".into(),
                    url: "https://huggingface.co/istupakov/parakeet-tdt-0.6b-v3-onnx/resolve/main/decoder_joint-model.int8.onnx".into(),
                    sha256: Some("eea7483ee3d1a30375daedc8ed83e3960c91b098812127a0d99d1c8977667a70".into()),
                    size_bytes: 18_202_004,
                },
                ModelFile {
                    filename: "vocab.txt".into(),
                    url: "https://huggingface.co/istupakov/parakeet-tdt-0.6b-v3-onnx/resolve/main/vocab.txt".into(),
                    sha256: Some("d58544679ea4bc6ac563d1f545eb7d474bd6cfa467f0a6e2c1dc1c7d37e3c35d".into()),
                    size_bytes: 93_528,
                },
            ],
        },
    ]
}
