//! Background model coordinator.
//!
//! Drives the background models through download and compilation, one at a
//! time and in catalog order. Foreground dictation pauses the loop at its
//! checkpoints (before a model starts, between download and compile); an
//! in-flight download or compile is never interrupted by a pause.
//!
//! ```text
//! Pending ──> Downloading ──> Compiling ──> Ready
//!                  │               │
//!                  └────> Failed <─┘
//! ```
//!
//! All state lives in one `watch` channel owned by the coordinator. Every
//! mutation goes through `send_modify`, observers only read.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::artifacts::ModelArtifacts;
use crate::catalog::{ModelCatalog, ModelCatalogEntry};
use crate::compiler::CompilerFactory;
use crate::downloader::ModelDownloader;
use crate::error::PrepError;
use crate::events::{BackgroundModelEvent, DictationEvent, EVENT_CHANNEL_CAPACITY};
use crate::notifications::{ModelNotification, Notifier};
use crate::state::BackgroundState;
use crate::status::{ModelDownloadStatus, ModelPhase};
use crate::store::{ConfigStore, ConfigStoreExt, BACKGROUND_STATE, FIRST_BACKGROUND_COMPLETED};
use crate::ModelInfo;

/// Collaborators injected into the coordinator
pub struct CoordinatorDeps {
    pub catalog: ModelCatalog,
    pub artifacts: ModelArtifacts,
    pub store: Arc<dyn ConfigStore>,
    pub downloader: Arc<dyn ModelDownloader>,
    pub compilers: Arc<dyn CompilerFactory>,
    pub notifier: Arc<dyn Notifier>,
}

/// What `start()` did
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum StartOutcome {
    /// A processing loop was launched
    Started,
    /// A loop is already running; nothing changed
    AlreadyRunning,
    /// Every background model is ready; no loop was launched
    NothingToDo,
}

/// Whether the loop continues after a model
enum Flow {
    Continue,
    Stop,
}

/// Cancellation for one run of the loop.
///
/// `cancel` is observed at checkpoints only; `abort` additionally stops an
/// in-flight download.
#[derive(Clone, Default)]
struct RunTokens {
    cancel: CancellationToken,
    abort: CancellationToken,
}

pub struct BackgroundCoordinator {
    catalog: ModelCatalog,
    artifacts: ModelArtifacts,
    store: Arc<dyn ConfigStore>,
    downloader: Arc<dyn ModelDownloader>,
    compilers: Arc<dyn CompilerFactory>,
    notifier: Arc<dyn Notifier>,
    state: watch::Sender<BackgroundState>,
    paused: watch::Sender<bool>,
    events: broadcast::Sender<BackgroundModelEvent>,
    tokens: Mutex<RunTokens>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Held from snapshot to store write so writes land in mutation order
    persist_lock: Mutex<()>,
}

impl BackgroundCoordinator {
    /// Create the coordinator, restoring persisted state if there is any.
    pub fn new(deps: CoordinatorDeps) -> Arc<Self> {
        let state = match deps.store.get(&BACKGROUND_STATE) {
            Some(saved) => {
                info!(
                    "Restored background state for {} models",
                    saved.models.len()
                );
                saved.normalize_after_load()
            }
            None => BackgroundState::default(),
        };

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Arc::new(Self {
            catalog: deps.catalog,
            artifacts: deps.artifacts,
            store: deps.store,
            downloader: deps.downloader,
            compilers: deps.compilers,
            notifier: deps.notifier,
            state: watch::Sender::new(state),
            paused: watch::Sender::new(false),
            events,
            tokens: Mutex::new(RunTokens::default()),
            task: Mutex::new(None),
            persist_lock: Mutex::new(()),
        })
    }

    // ===== Control =====

    /// Launch the processing loop unless one is running or nothing is left.
    pub fn start(self: &Arc<Self>) -> StartOutcome {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());

        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Background processing already running");
            return StartOutcome::AlreadyRunning;
        }

        let remaining: Vec<&str> = self
            .catalog
            .background_names()
            .iter()
            .map(String::as_str)
            .filter(|name| !self.is_ready(name))
            .collect();

        if remaining.is_empty() {
            info!("All background models ready, nothing to process");
            return StartOutcome::NothingToDo;
        }

        info!("Starting background processing for {:?}", remaining);

        let tokens = RunTokens::default();
        *self.tokens.lock().unwrap_or_else(|e| e.into_inner()) = tokens.clone();

        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            this.run(tokens).await;
        }));

        StartOutcome::Started
    }

    /// Pause before the next checkpoint. Persists immediately.
    pub fn pause(&self) {
        info!("Pausing background model processing");
        self.paused.send_replace(true);
        self.update(|s| s.is_paused = true);
        self.persist();
    }

    /// Clear the pause flag. Persists immediately.
    pub fn resume(&self) {
        info!("Resuming background model processing");
        self.paused.send_replace(false);
        self.update(|s| s.is_paused = false);
        self.persist();
    }

    /// Ask the loop to stop at its next checkpoint.
    pub fn cancel(&self) {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        if !tokens.cancel.is_cancelled() {
            info!("Cancellation requested for background processing");
            tokens.cancel.cancel();
        }
    }

    /// Stop the loop and interrupt an in-flight download.
    ///
    /// The interrupted model goes back to `pending`; its partial files are kept
    /// so the next run resumes them.
    pub fn abort(&self) {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.cancel.cancel();
        tokens.abort.cancel();
    }

    /// Wait for the current processing loop, if any, to finish.
    pub async fn join(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Background processing task failed: {}", e);
            }
        }
    }

    /// Abort and wait for the loop to wind down.
    pub async fn shutdown(&self) {
        self.abort();
        self.join().await;
    }

    /// Map dictation start/end signals to pause/resume.
    pub fn listen_for_dictation(
        self: &Arc<Self>,
        mut signals: broadcast::Receiver<DictationEvent>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(DictationEvent::Started) => this.pause(),
                    Ok(DictationEvent::Ended) => this.resume(),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Missed {} dictation signals", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Dictation signal listener stopped");
        })
    }

    /// Delete a model's files and reset it to `pending`.
    pub fn remove_model(&self, model_name: &str) -> Result<(), PrepError> {
        if self.catalog.is_baseline(model_name) {
            return Err(PrepError::BaselineRemoval(model_name.to_string()));
        }
        let entry = self
            .catalog
            .find(model_name)
            .ok_or_else(|| PrepError::ModelNotFound(model_name.to_string()))?;

        if self.state.borrow().currently_processing.as_deref() == Some(model_name) {
            return Err(PrepError::ModelBusy(model_name.to_string()));
        }

        self.artifacts.remove(entry)?;
        self.update(|s| {
            s.models.insert(
                model_name.to_string(),
                ModelDownloadStatus::pending(model_name),
            );
        });
        self.persist();
        Ok(())
    }

    // ===== Queries =====

    /// Is the model usable for transcription?
    ///
    /// The baseline model always is. Otherwise the stored phase decides, with
    /// a fallback to the files on disk for lost or reset state.
    pub fn is_ready(&self, model_name: &str) -> bool {
        if self.catalog.is_baseline(model_name) {
            return true;
        }
        let stored_ready = self
            .state
            .borrow()
            .status(model_name)
            .is_some_and(|s| s.phase == ModelPhase::Ready);
        if stored_ready {
            return true;
        }
        self.catalog
            .find(model_name)
            .is_some_and(|entry| self.artifacts.is_prepared(entry))
    }

    pub fn status_for(&self, model_name: &str) -> Option<ModelDownloadStatus> {
        self.state.borrow().status(model_name).cloned()
    }

    /// Snapshot of the whole aggregate
    pub fn snapshot(&self) -> BackgroundState {
        self.state.borrow().clone()
    }

    /// Observe every state change
    pub fn subscribe(&self) -> watch::Receiver<BackgroundState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<BackgroundModelEvent> {
        self.events.subscribe()
    }

    pub fn is_processing(&self) -> bool {
        self.state.borrow().is_processing
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// True until every background model has been ready at the end of a run.
    pub fn is_first_launch(&self) -> bool {
        !self.first_batch_completed()
    }

    /// Mean combined progress across the background list.
    pub fn overall_progress(&self) -> f64 {
        let names = self.catalog.background_names();
        if names.is_empty() {
            return 1.0;
        }
        let sum: f64 = names
            .iter()
            .map(|name| {
                if self.is_ready(name) {
                    1.0
                } else {
                    self.state
                        .borrow()
                        .status(name)
                        .map(|s| s.total_progress())
                        .unwrap_or(0.0)
                }
            })
            .sum();
        sum / names.len() as f64
    }

    /// Human readable description of the current work, `None` when idle.
    pub fn status_message(&self) -> Option<String> {
        let state = self.state.borrow();
        if !state.is_processing {
            return None;
        }
        if state.is_paused {
            return Some("Model downloads paused while dictating".to_string());
        }

        let Some(current) = state.current_status() else {
            return Some("Preparing speech models…".to_string());
        };
        let display_name = self
            .catalog
            .find(&current.model_name)
            .map(|e| e.display_name.as_str())
            .unwrap_or(current.model_name.as_str());
        let names = self.catalog.background_names();
        let position = names
            .iter()
            .position(|n| n == &current.model_name)
            .map(|i| format!(" ({} of {})", i + 1, names.len()))
            .unwrap_or_default();
        let percent = (current.total_progress() * 100.0).round() as u32;

        Some(match current.phase {
            ModelPhase::Downloading => {
                format!("Downloading {}{}… {}%", display_name, position, percent)
            }
            ModelPhase::Compiling => {
                format!("Optimizing {}{}… {}%", display_name, position, percent)
            }
            _ => format!("Preparing {}{}…", display_name, position),
        })
    }

    pub fn estimated_time_remaining(&self) -> Option<Duration> {
        self.state
            .borrow()
            .current_status()
            .and_then(|s| s.estimated_time_remaining(Utc::now()))
    }

    /// Catalog and status merged, for each background model in order.
    pub fn models(&self) -> Vec<ModelInfo> {
        self.catalog
            .background_entries()
            .into_iter()
            .map(|entry| {
                let status = self
                    .status_for(&entry.name)
                    .unwrap_or_else(|| ModelDownloadStatus::pending(entry.name.clone()));
                ModelInfo::from_catalog_and_status(entry, &status, self.is_ready(&entry.name))
            })
            .collect()
    }

    // ===== Processing loop =====

    async fn run(&self, tokens: RunTokens) {
        self.update(|s| s.is_processing = true);
        self.persist();

        let mut paused = self.paused.subscribe();
        let entries: Vec<ModelCatalogEntry> = self
            .catalog
            .background_entries()
            .into_iter()
            .cloned()
            .collect();

        for entry in &entries {
            if self.is_ready(&entry.name) {
                self.record_already_ready(&entry.name);
                continue;
            }

            if !self.wait_while_paused(&mut paused, &tokens.cancel).await {
                info!("Background processing cancelled before '{}'", entry.name);
                break;
            }

            if let Flow::Stop = self.process_model(entry, &mut paused, &tokens).await {
                break;
            }
        }

        self.finish_run();
    }

    async fn process_model(
        &self,
        entry: &ModelCatalogEntry,
        paused: &mut watch::Receiver<bool>,
        tokens: &RunTokens,
    ) -> Flow {
        let name = entry.name.as_str();
        let model_dir = self.artifacts.model_dir(entry);

        let started_at = Utc::now();
        self.update(|s| {
            s.status_mut(name).begin_download(started_at);
            s.currently_processing = Some(name.to_string());
        });
        self.persist();
        info!("Downloading background model '{}'", name);

        // Progress ticks are published but not persisted
        let on_download = |fraction: f64| {
            self.update(|s| {
                if let Some(status) = s.models.get_mut(name) {
                    status.download_progress = fraction;
                }
            })
        };
        match self
            .downloader
            .download(entry, &model_dir, &on_download, &tokens.abort)
            .await
        {
            Ok(()) => {}
            Err(PrepError::Cancelled) => {
                self.reset_interrupted(name);
                return Flow::Stop;
            }
            Err(e) => {
                self.record_failure(name, &e);
                return Flow::Continue;
            }
        }

        self.update(|s| s.status_mut(name).begin_compile());
        self.persist();

        if !self.wait_while_paused(paused, &tokens.cancel).await {
            self.reset_interrupted(name);
            return Flow::Stop;
        }

        info!("Compiling background model '{}'", name);
        let on_compile = |fraction: f64| {
            self.update(|s| {
                if let Some(status) = s.models.get_mut(name) {
                    status.compile_progress = fraction;
                }
            })
        };
        // Separate instance so the live transcription model is untouched
        let mut compiler = self.compilers.create();
        let result = compiler.compile(entry, &model_dir, &on_compile).await;
        compiler.unload();
        drop(compiler);

        match result {
            Ok(()) => self.record_ready(entry).await,
            Err(e) => self.record_failure(name, &e),
        }
        Flow::Continue
    }

    /// Wait until not paused. Returns `false` if cancellation was requested.
    async fn wait_while_paused(
        &self,
        paused: &mut watch::Receiver<bool>,
        cancel: &CancellationToken,
    ) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if !*paused.borrow_and_update() {
                return true;
            }
            debug!("Background processing paused, waiting");
            tokio::select! {
                changed = paused.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
                _ = cancel.cancelled() => return false,
            }
        }
    }

    fn record_already_ready(&self, name: &str) {
        let already = self
            .state
            .borrow()
            .status(name)
            .is_some_and(|s| s.phase == ModelPhase::Ready);
        if already {
            return;
        }
        info!("Model '{}' already on disk, marking ready", name);
        let now = Utc::now();
        self.update(|s| {
            s.models
                .insert(name.to_string(), ModelDownloadStatus::ready(name, now));
        });
        self.persist();
    }

    async fn record_ready(&self, entry: &ModelCatalogEntry) {
        let name = entry.name.as_str();
        let now = Utc::now();
        self.update(|s| {
            s.status_mut(name).mark_ready(now);
            s.currently_processing = None;
        });
        self.persist();
        info!("Background model '{}' is ready", name);

        if let Err(e) = self
            .notifier
            .schedule(ModelNotification::model_ready(entry))
            .await
        {
            warn!("Failed to schedule notification for '{}': {}", name, e);
        }
        // No receivers is fine
        let _ = self.events.send(BackgroundModelEvent::ModelReady {
            model_name: name.to_string(),
        });
    }

    fn record_failure(&self, name: &str, err: &PrepError) {
        let message = err.to_string();
        error!("Background model '{}' failed: {}", name, message);
        let now = Utc::now();
        self.update(|s| {
            s.status_mut(name).mark_failed(message.clone(), now);
            s.currently_processing = None;
        });
        self.persist();
        let _ = self.events.send(BackgroundModelEvent::ModelFailed {
            model_name: name.to_string(),
            error: message,
        });
    }

    fn reset_interrupted(&self, name: &str) {
        info!("Processing of '{}' interrupted, back to pending", name);
        self.update(|s| {
            s.models
                .insert(name.to_string(), ModelDownloadStatus::pending(name));
            s.currently_processing = None;
        });
        self.persist();
    }

    fn finish_run(&self) {
        let all_ready = self
            .catalog
            .background_names()
            .iter()
            .all(|name| self.is_ready(name));

        let now = Utc::now();
        self.update(|s| {
            s.is_processing = false;
            s.currently_processing = None;
            s.last_completed_at = Some(now);
        });

        if all_ready && !self.first_batch_completed() {
            info!("First background batch completed");
            if let Err(e) = self.store.set(&FIRST_BACKGROUND_COMPLETED, &true) {
                error!("Failed to record first background completion: {}", e);
            }
        }
        self.persist();

        let state = self.state.borrow();
        info!(
            "Background processing finished ({} ready, {} failed, all ready: {})",
            state.count_in(ModelPhase::Ready),
            state.count_in(ModelPhase::Failed),
            all_ready
        );
        drop(state);
        let _ = self
            .events
            .send(BackgroundModelEvent::BatchFinished { all_ready });
    }

    // ===== State helpers =====

    fn first_batch_completed(&self) -> bool {
        self.store.get(&FIRST_BACKGROUND_COMPLETED).unwrap_or(false)
    }

    fn update(&self, f: impl FnOnce(&mut BackgroundState)) {
        self.state.send_modify(|state| {
            f(state);
            debug_assert!(state.invariants_hold(), "invalid state: {:?}", state);
        });
    }

    /// Write the whole aggregate. Failures are logged, never fatal.
    fn persist(&self) {
        let _guard = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = self.state.borrow().clone();
        if let Err(e) = self.store.set(&BACKGROUND_STATE, &snapshot) {
            error!("Failed to persist background state: {}", e);
        }
    }
}
