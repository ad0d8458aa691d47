use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress below this fraction is too noisy to extrapolate from.
const ETA_MIN_PROGRESS: f64 = 0.05;

/// Preparation phase of a single model.
///
/// Progresses `Pending → Downloading → Compiling → Ready`. `Failed` is
/// reachable from `Downloading` or `Compiling` and is terminal for a run.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
pub enum ModelPhase {
    #[default]
    Pending,
    Downloading,
    Compiling,
    Ready,
    Failed,
}

impl ModelPhase {
    /// Download or compile in flight
    pub fn is_active(self) -> bool {
        matches!(self, Self::Downloading | Self::Compiling)
    }
}

/// Persisted preparation status of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDownloadStatus {
    pub model_name: String,
    pub phase: ModelPhase,
    /// Download completion in [0, 1]
    pub download_progress: f64,
    /// Compilation completion in [0, 1]
    pub compile_progress: f64,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ModelDownloadStatus {
    pub fn pending(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            phase: ModelPhase::Pending,
            download_progress: 0.0,
            compile_progress: 0.0,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Status for a model that was found ready without processing.
    pub fn ready(model_name: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            phase: ModelPhase::Ready,
            download_progress: 1.0,
            compile_progress: 1.0,
            completed_at: Some(at),
            ..Self::pending(model_name)
        }
    }

    /// Download and compilation weighted 50/50.
    pub fn total_progress(&self) -> f64 {
        match self.phase {
            ModelPhase::Pending | ModelPhase::Failed => 0.0,
            ModelPhase::Downloading => 0.5 * clamp_fraction(self.download_progress),
            ModelPhase::Compiling => 0.5 + 0.5 * clamp_fraction(self.compile_progress),
            ModelPhase::Ready => 1.0,
        }
    }

    /// Remaining time extrapolated from elapsed time and combined progress.
    ///
    /// `None` until progress exceeds 5% or when no work is in flight.
    pub fn estimated_time_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.phase.is_active() {
            return None;
        }
        let started_at = self.started_at?;
        let progress = self.total_progress();
        if progress <= ETA_MIN_PROGRESS {
            return None;
        }

        let elapsed = (now - started_at).to_std().ok()?.as_secs_f64();
        let total = elapsed / progress;
        Some(Duration::from_secs_f64((total - elapsed).max(0.0)))
    }

    pub(crate) fn begin_download(&mut self, at: DateTime<Utc>) {
        self.phase = ModelPhase::Downloading;
        self.download_progress = 0.0;
        self.compile_progress = 0.0;
        self.error = None;
        self.started_at = Some(at);
        self.completed_at = None;
    }

    pub(crate) fn begin_compile(&mut self) {
        self.phase = ModelPhase::Compiling;
        self.download_progress = 1.0;
        self.compile_progress = 0.0;
    }

    pub(crate) fn mark_ready(&mut self, at: DateTime<Utc>) {
        self.phase = ModelPhase::Ready;
        self.download_progress = 1.0;
        self.compile_progress = 1.0;
        self.error = None;
        self.completed_at = Some(at);
    }

    pub(crate) fn mark_failed(&mut self, error: String, at: DateTime<Utc>) {
        self.phase = ModelPhase::Failed;
        self.error = Some(error);
        self.completed_at = Some(at);
    }
}

fn clamp_fraction(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn status_in(phase: ModelPhase, download: f64, compile: f64) -> ModelDownloadStatus {
        ModelDownloadStatus {
            phase,
            download_progress: download,
            compile_progress: compile,
            ..ModelDownloadStatus::pending("m")
        }
    }

    #[test]
    fn total_progress_respects_phase_bounds() {
        let fractions = [0.0, 0.1, 0.5, 0.99, 1.0, 1.7, -0.3, f64::NAN];
        for &d in &fractions {
            for &c in &fractions {
                assert_eq!(status_in(ModelPhase::Pending, d, c).total_progress(), 0.0);
                assert_eq!(status_in(ModelPhase::Failed, d, c).total_progress(), 0.0);
                assert_eq!(status_in(ModelPhase::Ready, d, c).total_progress(), 1.0);

                let downloading = status_in(ModelPhase::Downloading, d, c).total_progress();
                assert!((0.0..=0.5).contains(&downloading), "downloading {}", downloading);

                let compiling = status_in(ModelPhase::Compiling, d, c).total_progress();
                assert!((0.5..=1.0).contains(&compiling), "compiling {}", compiling);
            }
        }
    }

    #[test]
    fn total_progress_blends_halves() {
        assert_eq!(
            status_in(ModelPhase::Downloading, 0.5, 0.0).total_progress(),
            0.25
        );
        assert_eq!(
            status_in(ModelPhase::Compiling, 1.0, 0.5).total_progress(),
            0.75
        );
    }

    #[test]
    fn eta_requires_progress_above_threshold() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let now = start + chrono::Duration::seconds(10);

        let mut status = status_in(ModelPhase::Downloading, 0.1, 0.0);
        status.started_at = Some(start);
        // 0.05 total progress is not above the threshold
        assert_eq!(status.estimated_time_remaining(now), None);

        status.download_progress = 0.5;
        // 25% done after 10s → 40s total → 30s left
        assert_eq!(
            status.estimated_time_remaining(now),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn eta_absent_without_start_or_when_idle() {
        let now = Utc::now();
        let status = status_in(ModelPhase::Compiling, 1.0, 0.5);
        assert_eq!(status.estimated_time_remaining(now), None);

        let mut ready = ModelDownloadStatus::ready("m", now);
        ready.started_at = Some(now - chrono::Duration::seconds(5));
        assert_eq!(ready.estimated_time_remaining(now), None);
    }

    #[test]
    fn phase_display_is_lowercase() {
        assert_eq!(ModelPhase::Downloading.to_string(), "downloading");
        assert_eq!(ModelPhase::Failed.to_string(), "failed");
    }

    #[test]
    fn begin_download_clears_previous_failure() {
        let now = Utc::now();
        let mut status = ModelDownloadStatus::pending("m");
        status.mark_failed("boom".into(), now);
        status.begin_download(now);
        assert_eq!(status.phase, ModelPhase::Downloading);
        assert_eq!(status.error, None);
        assert_eq!(status.completed_at, None);
    }
}
