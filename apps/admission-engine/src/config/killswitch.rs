//! Kill-switch activation surface configuration.

use serde::{Deserialize, Serialize};

/// Kill-switch configuration.
///
/// `None` disables the corresponding source; the programmatic surface is
/// always available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchConfig {
    /// File whose presence activates the switch.
    #[serde(default = "default_sentinel_path")]
    pub sentinel_path: Option<String>,
    /// Environment variable whose value `1` or `true` activates the switch.
    #[serde(default = "default_env_flag")]
    pub env_flag: Option<String>,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            sentinel_path: default_sentinel_path(),
            env_flag: default_env_flag(),
        }
    }
}

fn default_sentinel_path() -> Option<String> {
    Some(".killswitch".to_string())
}

fn default_env_flag() -> Option<String> {
    Some("KEEL_KILL_SWITCH".to_string())
}
