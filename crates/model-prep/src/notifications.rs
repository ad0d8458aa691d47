use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::ModelCatalogEntry;

/// Category attached to readiness notifications, reserved for tap actions.
pub const MODEL_READY_CATEGORY: &str = "BACKGROUND_MODEL_READY";

/// A user-facing notification about a background model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelNotification {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub category: String,
    /// Model the notification refers to
    pub model_name: String,
}

impl ModelNotification {
    pub fn model_ready(entry: &ModelCatalogEntry) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: "New speech model ready".to_string(),
            body: format!(
                "{} has finished downloading and is ready to use.",
                entry.display_name
            ),
            category: MODEL_READY_CATEGORY.to_string(),
            model_name: entry.name.clone(),
        }
    }
}

/// Delivers notifications to the user. Failures are reported, never fatal.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn schedule(&self, notification: ModelNotification) -> Result<(), String>;
}

/// Notifier that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn schedule(&self, notification: ModelNotification) -> Result<(), String> {
        info!(
            "[notification {}] {}: {}",
            notification.id, notification.title, notification.body
        );
        Ok(())
    }
}

/// Posts a desktop notification. macOS only; logs on other platforms.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemNotifier;

#[async_trait]
impl Notifier for SystemNotifier {
    async fn schedule(&self, notification: ModelNotification) -> Result<(), String> {
        #[cfg(target_os = "macos")]
        {
            let script = format!(
                "display notification \"{}\" with title \"{}\"",
                escape_applescript(&notification.body),
                escape_applescript(&notification.title)
            );
            let status = tokio::process::Command::new("osascript")
                .arg("-e")
                .arg(script)
                .status()
                .await
                .map_err(|err| format!("Failed to run notification helper: {err}"))?;
            if !status.success() {
                return Err("Notification command failed".to_string());
            }
            debug!("Posted notification {} for '{}'", notification.id, notification.model_name);
            Ok(())
        }
        #[cfg(not(target_os = "macos"))]
        {
            debug!("System notifications unsupported here, logging instead");
            LogNotifier.schedule(notification).await
        }
    }
}

#[cfg(any(target_os = "macos", test))]
fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
