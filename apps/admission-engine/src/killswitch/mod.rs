//! Global kill switch.
//!
//! Highest-priority override: if any activation source is active, every
//! order-submitting path must abort before touching a broker. Sources are
//! OR'd together and re-read on every check — the switch is never cached
//! across a run, so a sentinel file created mid-run is seen before the next
//! decision point.
//!
//! # Activation sources
//!
//! - a sentinel file (presence = active)
//! - an environment flag (`1` or `true` = active)
//! - a programmatic [`KillSwitch::activate`] call

use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum retained history events.
const HISTORY_CAP: usize = 256;

/// Which source activated (or deactivated) the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationSource {
    /// Direct [`KillSwitch::activate`] call.
    Programmatic,
    /// Sentinel file present on disk.
    SentinelFile,
    /// Environment flag set.
    EnvFlag,
}

impl ActivationSource {
    /// Stable string form used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Programmatic => "programmatic",
            Self::SentinelFile => "sentinel_file",
            Self::EnvFlag => "env_flag",
        }
    }
}

impl std::fmt::Display for ActivationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of the switch at one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillSwitchStatus {
    /// Whether any source is active.
    pub active: bool,
    /// Reason reported by the first active source.
    pub reason: Option<String>,
    /// The first active source (programmatic > sentinel > env precedence).
    pub source: Option<ActivationSource>,
}

impl KillSwitchStatus {
    const INACTIVE: Self = Self {
        active: false,
        reason: None,
        source: None,
    };
}

/// One activation or deactivation in the history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchEvent {
    /// `true` for activation, `false` for deactivation.
    pub activated: bool,
    /// Source of the event.
    pub source: ActivationSource,
    /// Reason supplied with the event.
    pub reason: String,
    /// Event timestamp.
    pub at: DateTime<Utc>,
}

/// Serializable snapshot of the switch's mutable state.
///
/// Persisted across restarts so a programmatic activation and the event
/// history survive a process bounce. File and environment sources need no
/// persistence; they are re-read from the world on every check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KillSwitchState {
    /// Reason for a programmatic activation still in force, if any.
    pub programmatic_reason: Option<String>,
    /// Activation/deactivation history.
    pub history: Vec<KillSwitchEvent>,
}

/// The global kill switch.
///
/// Cheap to share behind an `Arc`; all interior state is lock-guarded.
#[derive(Debug)]
pub struct KillSwitch {
    /// Sentinel file whose presence activates the switch.
    sentinel_path: Option<PathBuf>,
    /// Environment variable whose truthy value activates the switch.
    env_flag: Option<String>,
    /// Reason for programmatic activation; `None` when not active.
    programmatic: RwLock<Option<String>>,
    /// Activation/deactivation history, capped.
    history: RwLock<Vec<KillSwitchEvent>>,
}

impl KillSwitch {
    /// Create a kill switch with the given sentinel path and env flag name.
    #[must_use]
    pub fn new(sentinel_path: Option<PathBuf>, env_flag: Option<String>) -> Self {
        Self {
            sentinel_path,
            env_flag,
            programmatic: RwLock::new(None),
            history: RwLock::new(Vec::new()),
        }
    }

    /// A switch with no file or environment sources (programmatic only).
    #[must_use]
    pub fn programmatic_only() -> Self {
        Self::new(None, None)
    }

    /// Rebuild a switch from persisted state.
    ///
    /// A restored programmatic activation is still in force; only an
    /// explicit [`Self::deactivate`] clears it.
    #[must_use]
    pub fn with_state(
        sentinel_path: Option<PathBuf>,
        env_flag: Option<String>,
        state: KillSwitchState,
    ) -> Self {
        Self {
            sentinel_path,
            env_flag,
            programmatic: RwLock::new(state.programmatic_reason),
            history: RwLock::new(state.history),
        }
    }

    /// Snapshot the mutable state for persistence.
    #[must_use]
    pub fn state(&self) -> KillSwitchState {
        KillSwitchState {
            programmatic_reason: self
                .programmatic
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone(),
            history: self.history(),
        }
    }

    /// Check the switch, re-reading every source.
    #[must_use]
    pub fn status(&self) -> KillSwitchStatus {
        let programmatic = self
            .programmatic
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(reason) = programmatic.as_ref() {
            return KillSwitchStatus {
                active: true,
                reason: Some(reason.clone()),
                source: Some(ActivationSource::Programmatic),
            };
        }
        drop(programmatic);

        if let Some(path) = &self.sentinel_path {
            if path.exists() {
                return KillSwitchStatus {
                    active: true,
                    reason: Some(format!("sentinel file present: {}", path.display())),
                    source: Some(ActivationSource::SentinelFile),
                };
            }
        }

        if let Some(var) = &self.env_flag {
            if let Ok(value) = std::env::var(var) {
                let value = value.to_lowercase();
                if value == "1" || value == "true" {
                    return KillSwitchStatus {
                        active: true,
                        reason: Some(format!("environment flag {var} set")),
                        source: Some(ActivationSource::EnvFlag),
                    };
                }
            }
        }

        KillSwitchStatus::INACTIVE
    }

    /// Whether any source is currently active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status().active
    }

    /// Activate the switch programmatically.
    pub fn activate(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut programmatic = self
                .programmatic
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *programmatic = Some(reason.clone());
        }
        self.push_event(true, ActivationSource::Programmatic, &reason);
        tracing::error!(reason = %reason, "Kill switch activated");
    }

    /// Deactivate the programmatic source.
    ///
    /// File and environment sources stay active until the operator removes
    /// them; deactivation here cannot override them.
    pub fn deactivate(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut programmatic = self
                .programmatic
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *programmatic = None;
        }
        self.push_event(false, ActivationSource::Programmatic, &reason);
        tracing::warn!(reason = %reason, "Kill switch deactivated");
    }

    /// Snapshot of the history log.
    #[must_use]
    pub fn history(&self) -> Vec<KillSwitchEvent> {
        self.history
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn push_event(&self, activated: bool, source: ActivationSource, reason: &str) {
        let mut history = self
            .history
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        history.push(KillSwitchEvent {
            activated,
            source,
            reason: reason.to_string(),
            at: Utc::now(),
        });
        let excess = history.len().saturating_sub(HISTORY_CAP);
        if excess > 0 {
            history.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_by_default() {
        let switch = KillSwitch::programmatic_only();
        let status = switch.status();
        assert!(!status.active);
        assert!(status.reason.is_none());
    }

    #[test]
    fn test_programmatic_activation() {
        let switch = KillSwitch::programmatic_only();
        switch.activate("manual halt");

        let status = switch.status();
        assert!(status.active);
        assert_eq!(status.source, Some(ActivationSource::Programmatic));
        assert_eq!(status.reason.as_deref(), Some("manual halt"));

        switch.deactivate("resolved");
        assert!(!switch.is_active());
    }

    #[test]
    fn test_sentinel_file_checked_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let sentinel = dir.path().join("KILL");
        let switch = KillSwitch::new(Some(sentinel.clone()), None);

        assert!(!switch.is_active());

        // Created mid-run: the very next check must see it.
        std::fs::write(&sentinel, b"stop").unwrap();
        let status = switch.status();
        assert!(status.active);
        assert_eq!(status.source, Some(ActivationSource::SentinelFile));

        std::fs::remove_file(&sentinel).unwrap();
        assert!(!switch.is_active());
    }

    #[test]
    fn test_env_flag_activation() {
        let var = "KEEL_TEST_KILLSWITCH_FLAG";
        std::env::remove_var(var);
        let switch = KillSwitch::new(None, Some(var.to_string()));

        assert!(!switch.is_active());

        std::env::set_var(var, "true");
        let status = switch.status();
        assert!(status.active);
        assert_eq!(status.source, Some(ActivationSource::EnvFlag));

        std::env::set_var(var, "0");
        assert!(!switch.is_active());
        std::env::remove_var(var);
    }

    #[test]
    fn test_deactivate_does_not_override_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let sentinel = dir.path().join("KILL");
        std::fs::write(&sentinel, b"stop").unwrap();
        let switch = KillSwitch::new(Some(sentinel), None);

        switch.deactivate("attempted clear");
        assert!(switch.is_active());
    }

    #[test]
    fn test_state_round_trip_keeps_activation_in_force() {
        let switch = KillSwitch::programmatic_only();
        switch.activate("operator halt");

        // A restart must not silently clear the halt.
        let restored = KillSwitch::with_state(None, None, switch.state());
        let status = restored.status();
        assert!(status.active);
        assert_eq!(status.source, Some(ActivationSource::Programmatic));
        assert_eq!(status.reason.as_deref(), Some("operator halt"));
        assert_eq!(restored.history().len(), 1);

        restored.deactivate("resolved");
        assert!(!restored.is_active());
    }

    #[test]
    fn test_history_records_events() {
        let switch = KillSwitch::programmatic_only();
        switch.activate("drill");
        switch.deactivate("drill over");

        let history = switch.history();
        assert_eq!(history.len(), 2);
        assert!(history[0].activated);
        assert!(!history[1].activated);
        assert_eq!(history[0].reason, "drill");
    }
}
