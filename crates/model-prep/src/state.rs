use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::status::{ModelDownloadStatus, ModelPhase};

/// Aggregate background preparation state, persisted as a single blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundState {
    #[serde(default)]
    pub models: BTreeMap<String, ModelDownloadStatus>,
    #[serde(default)]
    pub is_processing: bool,
    #[serde(default)]
    pub is_paused: bool,
    /// Model currently in download or compile. Only set while `is_processing`.
    #[serde(default)]
    pub currently_processing: Option<String>,
    #[serde(default)]
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl BackgroundState {
    pub fn status(&self, model_name: &str) -> Option<&ModelDownloadStatus> {
        self.models.get(model_name)
    }

    /// Status for `model_name`, inserting a pending one if missing.
    pub(crate) fn status_mut(&mut self, model_name: &str) -> &mut ModelDownloadStatus {
        self.models
            .entry(model_name.to_string())
            .or_insert_with(|| ModelDownloadStatus::pending(model_name))
    }

    /// Status of the model being processed right now
    pub fn current_status(&self) -> Option<&ModelDownloadStatus> {
        self.currently_processing
            .as_deref()
            .and_then(|name| self.models.get(name))
    }

    /// Fix up a state read back from storage.
    ///
    /// A process that exits mid-phase leaves a model in `downloading` or
    /// `compiling` with no task behind it; those go back to `pending`.
    /// Pause tracks live dictation, so it never carries over either.
    pub(crate) fn normalize_after_load(mut self) -> Self {
        for status in self.models.values_mut() {
            if status.phase.is_active() {
                warn!(
                    "Model '{}' was interrupted while {}, resetting to pending",
                    status.model_name, status.phase
                );
                *status = ModelDownloadStatus::pending(status.model_name.clone());
            }
        }
        self.is_processing = false;
        self.is_paused = false;
        self.currently_processing = None;
        self
    }

    /// Checks the aggregate invariants. Used by tests and debug assertions.
    pub fn invariants_hold(&self) -> bool {
        let current_ok = match &self.currently_processing {
            Some(name) => self.is_processing && self.models.contains_key(name),
            None => true,
        };
        let active = self
            .models
            .values()
            .filter(|s| s.phase.is_active())
            .count();
        current_ok && active <= 1
    }

    /// Number of models in the given phase
    pub fn count_in(&self, phase: ModelPhase) -> usize {
        self.models.values().filter(|s| s.phase == phase).count()
    }
}
