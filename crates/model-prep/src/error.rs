use thiserror::Error;

/// Errors raised while preparing a model.
///
/// The coordinator never propagates these past a single model: each one is
/// rendered with `to_string()` into the model's `failed` status.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PrepError {
    #[error("Model not found in catalog: {0}")]
    ModelNotFound(String),
    #[error("Baseline model cannot be a background model: {0}")]
    BaselineInBackground(String),
    #[error("The baseline model '{0}' is bundled and cannot be removed")]
    BaselineRemoval(String),
    #[error("Model '{0}' is currently being prepared")]
    ModelBusy(String),
    #[error("Download failed: {0}")]
    Download(String),
    #[error("Download failed with status: {0}")]
    HttpStatus(u16),
    #[error("Download cancelled")]
    Cancelled,
    #[error("Checksum mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },
    #[error("Missing model file: {0}")]
    MissingFile(String),
    #[error("Compilation failed: {0}")]
    Compile(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for PrepError {
    fn from(e: reqwest::Error) -> Self {
        PrepError::Download(e.to_string())
    }
}

/// Errors from the key-value store used for persistence and config.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access store file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to (de)serialize store value: {0}")]
    Serde(#[from] serde_json::Error),
}
