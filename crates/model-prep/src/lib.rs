//! Background download and preparation of speech models.
//!
//! The [`BackgroundCoordinator`] walks a fixed, ordered list of background
//! models and takes each one through download and compilation, persisting its
//! progress in a [`ConfigStore`] so work survives restarts. Foreground
//! dictation pauses it through [`DictationEvent`]s.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hushtype_model_prep::{
//!     BackgroundCoordinator, ChecksumCompilerFactory, CoordinatorDeps, HttpDownloader,
//!     JsonFileStore, LogNotifier, ModelArtifacts, ModelCatalog,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let artifacts = ModelArtifacts::new("/tmp/hushtype/models");
//! let coordinator = BackgroundCoordinator::new(CoordinatorDeps {
//!     catalog: ModelCatalog::builtin(),
//!     artifacts: artifacts.clone(),
//!     store: Arc::new(JsonFileStore::open("/tmp/hushtype/config.json")?),
//!     downloader: Arc::new(HttpDownloader::new()),
//!     compilers: Arc::new(ChecksumCompilerFactory::new(artifacts)),
//!     notifier: Arc::new(LogNotifier),
//! });
//! coordinator.start();
//! coordinator.join().await;
//! # Ok(())
//! # }
//! ```

mod artifacts;
mod catalog;
mod compiler;
mod coordinator;
mod downloader;
mod error;
pub mod events;
mod notifications;
mod state;
mod status;
pub mod store;

pub use artifacts::{ModelArtifacts, PreparedManifest};
pub use catalog::{
    ModelCatalog, ModelCatalogEntry, ModelFile, ModelType, BASELINE_MODEL,
    DEFAULT_BACKGROUND_MODELS,
};
pub use compiler::{ChecksumCompiler, ChecksumCompilerFactory, CompilerFactory, ModelCompiler};
pub use coordinator::{BackgroundCoordinator, CoordinatorDeps, StartOutcome};
pub use downloader::{HttpDownloader, ModelDownloader, ProgressFn};
pub use error::{PrepError, StoreError};
pub use events::{BackgroundModelEvent, DictationEvent};
pub use notifications::{LogNotifier, ModelNotification, Notifier, SystemNotifier};
pub use state::BackgroundState;
pub use status::{ModelDownloadStatus, ModelPhase};
pub use store::{ConfigKey, ConfigStore, ConfigStoreExt, JsonFileStore, MemoryStore};

use serde::{Deserialize, Serialize};

/// Combined view for observers (catalog + status merged).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    // From catalog
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub size_bytes: u64,
    pub estimated_ram_mb: u64,

    // From status
    pub phase: ModelPhase,
    pub total_progress: f64,
    pub error: Option<String>,
    pub is_ready: bool,
}

impl ModelInfo {
    /// `is_ready` also covers models found on disk without a stored status.
    pub fn from_catalog_and_status(
        catalog: &ModelCatalogEntry,
        status: &ModelDownloadStatus,
        is_ready: bool,
    ) -> Self {
        Self {
            name: catalog.name.clone(),
            display_name: catalog.display_name.clone(),
            description: catalog.description.clone(),
            size_bytes: catalog.size_bytes(),
            estimated_ram_mb: catalog.estimated_ram_mb,
            phase: if is_ready {
                ModelPhase::Ready
            } else {
                status.phase
            },
            total_progress: if is_ready {
                1.0
            } else {
                status.total_progress()
            },
            error: if is_ready { None } else { status.error.clone() },
            is_ready,
        }
    }
}
