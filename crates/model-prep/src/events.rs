//! In-process events for the background preparation service.
//!
//! Uses discriminated unions (tagged enums) so observers can serialize them
//! straight to a UI layer.

use serde::{Deserialize, Serialize};

/// Capacity of the broadcast channels; slow observers lag instead of blocking.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Outbound events emitted by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum BackgroundModelEvent {
    /// A model finished compiling and can be used for transcription
    #[serde(rename = "ready")]
    ModelReady {
        #[serde(rename = "modelName")]
        model_name: String,
    },
    /// A model failed to download or compile
    #[serde(rename = "failed")]
    ModelFailed {
        #[serde(rename = "modelName")]
        model_name: String,
        error: String,
    },
    /// The processing loop ended, normally or through cancellation
    #[serde(rename = "batchFinished")]
    BatchFinished {
        #[serde(rename = "allReady")]
        all_ready: bool,
    },
}

/// Inbound signals from the foreground dictation feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
pub enum DictationEvent {
    /// Dictation needs the machine; background work pauses
    Started,
    /// Dictation finished; background work resumes
    Ended,
}
