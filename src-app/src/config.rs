use std::path::{Path, PathBuf};

use hushtype_model_prep::{ConfigKey, ConfigStore, ConfigStoreExt, StoreError};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Environment variable overriding the application data directory
pub const DATA_DIR_ENV: &str = "HUSHTYPE_DATA_DIR";

const STORE_FILENAME: &str = "config.json";

// ===== App Configuration =====

/// App configuration (stored locally)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Where models are stored. Defaults to `<data dir>/models`.
    #[serde(default)]
    pub models_dir: Option<PathBuf>,
    /// Replaces the built-in background model list, in processing order
    #[serde(default)]
    pub background_models: Option<Vec<String>>,
    /// Post a desktop notification when a model is ready
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    /// Start background processing as soon as the app is up
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            models_dir: None,
            background_models: None,
            notifications_enabled: true,
            auto_start: true,
        }
    }
}

pub const APP_CONFIG: ConfigKey<AppConfig> = ConfigKey::new("appConfig");

pub fn load_app_config(store: &dyn ConfigStore) -> AppConfig {
    store.get(&APP_CONFIG).unwrap_or_default()
}

pub fn save_app_config(store: &dyn ConfigStore, config: &AppConfig) -> Result<(), StoreError> {
    store.set(&APP_CONFIG, config)
}

// ===== Paths =====

/// Filesystem locations used by the app
#[derive(Debug, Clone, PartialEq)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub store_path: PathBuf,
}

impl AppPaths {
    pub fn from_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            store_path: data_dir.join(STORE_FILENAME),
            data_dir,
        }
    }

    /// `$HUSHTYPE_DATA_DIR`, else the platform data directory.
    pub fn resolve() -> Result<Self, Error> {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
            return Ok(Self::from_data_dir(dir));
        }
        let base = dirs::data_dir().ok_or(Error::NoDataDir)?;
        Ok(Self::from_data_dir(base.join("hushtype")))
    }

    pub fn models_dir(&self, config: &AppConfig) -> PathBuf {
        match &config.models_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.data_dir.join(dir),
            None => self.data_dir.join("models"),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hushtype_model_prep::MemoryStore;

    #[test]
    fn test_app_config_store() {
        let test_cases = vec![
            ("defaults", AppConfig::default()),
            (
                "all fields set",
                AppConfig {
                    models_dir: Some(PathBuf::from("/opt/models")),
                    background_models: Some(vec!["whisper-medium".into()]),
                    notifications_enabled: false,
                    auto_start: false,
                },
            ),
        ];

        for (description, config) in test_cases {
            let store = MemoryStore::new();
            assert_eq!(load_app_config(&store), AppConfig::default(), "{}", description);
            save_app_config(&store, &config).unwrap();
            assert_eq!(load_app_config(&store), config, "{}", description);
        }
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"autoStart": false}"#).unwrap();
        assert!(!config.auto_start);
        assert!(config.notifications_enabled);
        assert_eq!(config.background_models, None);
    }

    #[test]
    fn models_dir_resolution() {
        let paths = AppPaths::from_data_dir("/data/hushtype");
        assert_eq!(paths.store_path, PathBuf::from("/data/hushtype/config.json"));

        let mut config = AppConfig::default();
        assert_eq!(paths.models_dir(&config), PathBuf::from("/data/hushtype/models"));

        config.models_dir = Some(PathBuf::from("cache"));
        assert_eq!(paths.models_dir(&config), PathBuf::from("/data/hushtype/cache"));

        config.models_dir = Some(PathBuf::from("/mnt/models"));
        assert_eq!(paths.models_dir(&config), PathBuf::from("/mnt/models"));
    }
}
