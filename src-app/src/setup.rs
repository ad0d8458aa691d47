use std::sync::Arc;

use hushtype_model_prep::{
    BackgroundCoordinator, BackgroundModelEvent, ChecksumCompilerFactory, ConfigStore,
    CoordinatorDeps, DictationEvent, HttpDownloader, JsonFileStore, LogNotifier, ModelArtifacts,
    ModelCatalog, Notifier, StartOutcome, SystemNotifier,
};
use log::{debug, error, info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{self, AppConfig, AppPaths};
use crate::error::Error;

const DICTATION_CHANNEL_CAPACITY: usize = 16;

/// Running application: the coordinator plus the tasks wired around it.
pub struct App {
    pub config: AppConfig,
    pub coordinator: Arc<BackgroundCoordinator>,
    dictation: broadcast::Sender<DictationEvent>,
    listener: JoinHandle<()>,
    observer: JoinHandle<()>,
}

impl App {
    /// Forward a dictation start/end signal to the coordinator.
    pub fn signal_dictation(&self, event: DictationEvent) {
        if self.dictation.send(event).is_err() {
            warn!("No dictation listener for {}", event);
        }
    }

    /// Stop background work and the helper tasks.
    pub async fn shutdown(self) {
        info!("Shutting down");
        self.coordinator.shutdown().await;
        self.listener.abort();
        self.observer.abort();
    }
}

/// Build the coordinator from the data directory. Must run inside a tokio runtime.
pub fn setup_app(paths: &AppPaths) -> Result<App, Error> {
    std::fs::create_dir_all(&paths.data_dir)?;
    let store = JsonFileStore::open(&paths.store_path)?;
    info!("Config store: {}", store.path().display());
    setup_with_store(paths, Arc::new(store))
}

pub(crate) fn setup_with_store(
    paths: &AppPaths,
    store: Arc<dyn ConfigStore>,
) -> Result<App, Error> {
    let app_config = config::load_app_config(store.as_ref());
    debug!("App config: {:?}", app_config);

    let mut catalog = ModelCatalog::builtin();
    if let Some(background) = app_config.background_models.clone() {
        info!("Using configured background models: {:?}", background);
        catalog = catalog.with_background(background)?;
    }

    let models_dir = paths.models_dir(&app_config);
    info!("Models directory: {}", models_dir.display());
    let artifacts = ModelArtifacts::new(models_dir);

    let notifier: Arc<dyn Notifier> = if app_config.notifications_enabled {
        Arc::new(SystemNotifier)
    } else {
        Arc::new(LogNotifier)
    };

    let coordinator = BackgroundCoordinator::new(CoordinatorDeps {
        catalog,
        artifacts: artifacts.clone(),
        store,
        downloader: Arc::new(HttpDownloader::new()),
        compilers: Arc::new(ChecksumCompilerFactory::new(artifacts)),
        notifier,
    });

    if coordinator.is_first_launch() {
        info!("Background models have not completed yet on this install");
    }

    let (dictation, signals) = broadcast::channel(DICTATION_CHANNEL_CAPACITY);
    let listener = coordinator.listen_for_dictation(signals);
    let observer = spawn_event_logger(coordinator.events());

    if app_config.auto_start {
        match coordinator.start() {
            StartOutcome::Started => info!("Background model preparation started"),
            outcome => debug!("Background start: {}", outcome),
        }
    }

    Ok(App {
        config: app_config,
        coordinator,
        dictation,
        listener,
        observer,
    })
}

fn spawn_event_logger(mut events: broadcast::Receiver<BackgroundModelEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(BackgroundModelEvent::ModelReady { model_name }) => {
                    info!("Model ready: {}", model_name);
                }
                Ok(BackgroundModelEvent::ModelFailed { model_name, error }) => {
                    error!("Model {} failed: {}", model_name, error);
                }
                Ok(BackgroundModelEvent::BatchFinished { all_ready }) => {
                    info!("Background batch finished (all ready: {})", all_ready);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event logger skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
