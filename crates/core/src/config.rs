use serde::Deserialize;
use std::time::Duration;

/// Scheduling policy knobs, taken from the editor's `initializationOptions`.
///
/// Unknown fields are ignored so older clients can keep sending their full
/// settings blob.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    /// Quiet period after the last change before a batch is analyzed.
    pub debounce_ms: u64,
    /// Whether a save also refreshes server-tracked findings.
    pub fetch_server_findings_on_save: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            fetch_server_findings_on_save: false,
        }
    }
}

impl SchedulerConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Parse from the raw `initializationOptions` value, falling back to
    /// defaults when the blob is absent or malformed.
    pub fn from_initialization_options(options: Option<serde_json::Value>) -> Self {
        match options {
            None => Self::default(),
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::warn!("Malformed initialization options, using defaults: {}", e);
                Self::default()
            }),
        }
    }
}
