//! Checkpoint store configuration.

use serde::{Deserialize, Serialize};

/// Checkpoint store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory holding one JSON document per run.
    #[serde(default = "default_dir")]
    pub dir: String,
    /// Maximum age before a document is rejected on resume.
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            freshness_secs: default_freshness_secs(),
        }
    }
}

fn default_dir() -> String {
    "checkpoints".to_string()
}

const fn default_freshness_secs() -> u64 {
    3600
}
