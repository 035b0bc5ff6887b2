use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine-wide defaults consumed by every store of a composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Observe nested containers (default: true). A store definition may
    /// override this.
    #[serde(default = "default_deep")]
    pub deep: bool,
    /// Quiet window before a persisted store is written (default: 300).
    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,
    /// Directory for local storage. Falls back to the platform data dir.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deep: default_deep(),
            persist_debounce_ms: default_persist_debounce_ms(),
            storage_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }

    /// Directory backing `StorageKind::Local`.
    pub fn storage_root(&self) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ministore")
        })
    }
}

fn default_deep() -> bool {
    true
}

fn default_persist_debounce_ms() -> u64 {
    300
}
