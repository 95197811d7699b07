//! File-backed persistence for circuit-breaker and kill-switch state.
//!
//! One timestamped JSON document per concern, written with the same atomic
//! temp-file + fsync + rename discipline as the run checkpoints. Readers get
//! the saved-at timestamp alongside the state and a freshness verdict; the
//! caller decides what a stale document means for its concern (a stale halt
//! is still a halt, a stale loss streak is not).

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{write_atomic, CheckpointError};
use crate::breaker::BreakerState;
use crate::killswitch::KillSwitchState;

const BREAKER_FILE: &str = "breaker.json";
const KILL_SWITCH_FILE: &str = "killswitch.json";

/// A state document with its write timestamp and freshness verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Persisted<T> {
    /// The persisted state.
    pub state: T,
    /// When the document was written.
    pub saved_at: DateTime<Utc>,
    /// Whether the document was younger than the freshness threshold when
    /// loaded.
    pub fresh: bool,
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    saved_at: DateTime<Utc>,
    state: T,
}

/// Durable store for engine state that must survive restarts.
#[derive(Debug)]
pub struct StateStore {
    dir: PathBuf,
    freshness: chrono::Duration,
}

impl StateStore {
    /// Open (creating if needed) a state store rooted at `dir`.
    ///
    /// Documents older than `freshness_secs` load with `fresh == false`.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Io`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>, freshness_secs: u64) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            freshness: chrono::Duration::seconds(
                i64::try_from(freshness_secs).unwrap_or(i64::MAX),
            ),
        })
    }

    /// Persist the circuit-breaker state.
    ///
    /// # Errors
    ///
    /// I/O or serialization errors on write failure.
    pub fn save_breaker(&self, state: &BreakerState) -> Result<(), CheckpointError> {
        self.save(BREAKER_FILE, state)
    }

    /// Load the persisted circuit-breaker state, `None` if never saved.
    ///
    /// # Errors
    ///
    /// I/O errors, or a document that fails to parse. A corrupt breaker
    /// document is surfaced rather than discarded; silently starting over
    /// could clear a halt.
    pub fn load_breaker(&self) -> Result<Option<Persisted<BreakerState>>, CheckpointError> {
        self.load(BREAKER_FILE)
    }

    /// Persist the kill-switch state.
    ///
    /// # Errors
    ///
    /// I/O or serialization errors on write failure.
    pub fn save_kill_switch(&self, state: &KillSwitchState) -> Result<(), CheckpointError> {
        self.save(KILL_SWITCH_FILE, state)
    }

    /// Load the persisted kill-switch state, `None` if never saved.
    ///
    /// # Errors
    ///
    /// I/O errors, or a document that fails to parse.
    pub fn load_kill_switch(&self) -> Result<Option<Persisted<KillSwitchState>>, CheckpointError> {
        self.load(KILL_SWITCH_FILE)
    }

    fn save<T: Serialize>(&self, name: &str, state: &T) -> Result<(), CheckpointError> {
        let envelope = Envelope {
            saved_at: Utc::now(),
            state,
        };
        let json = serde_json::to_vec_pretty(&envelope)?;
        write_atomic(&self.dir.join(name), &json)?;
        Ok(())
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<Persisted<T>>, CheckpointError> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)?;
        let envelope: Envelope<T> = serde_json::from_str(&contents)?;
        let fresh = Utc::now() - envelope.saved_at <= self.freshness;
        Ok(Some(Persisted {
            state: envelope.state,
            saved_at: envelope.saved_at,
            fresh,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{BreakerPolicy, BreakerTier, DrawdownBreaker, PortfolioMetrics};
    use crate::killswitch::KillSwitch;
    use rust_decimal_macros::dec;

    fn store(dir: &tempfile::TempDir, freshness_secs: u64) -> StateStore {
        StateStore::open(dir.path(), freshness_secs).unwrap()
    }

    #[test]
    fn test_breaker_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 3600);

        let mut breaker = DrawdownBreaker::new(BreakerPolicy::default());
        breaker.update(PortfolioMetrics::from_drawdown(dec!(0.12)), Utc::now());
        store.save_breaker(&breaker.state()).unwrap();

        let loaded = store.load_breaker().unwrap().unwrap();
        assert_eq!(loaded.state.tier, BreakerTier::Level4);
        assert!(loaded.fresh);
    }

    #[test]
    fn test_kill_switch_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 3600);

        let switch = KillSwitch::programmatic_only();
        switch.activate("halt");
        store.save_kill_switch(&switch.state()).unwrap();

        let loaded = store.load_kill_switch().unwrap().unwrap();
        assert_eq!(loaded.state.programmatic_reason.as_deref(), Some("halt"));
        assert_eq!(loaded.state.history.len(), 1);
    }

    #[test]
    fn test_missing_document_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 3600);
        assert!(store.load_breaker().unwrap().is_none());
        assert!(store.load_kill_switch().unwrap().is_none());
    }

    #[test]
    fn test_old_document_loads_as_stale() {
        let dir = tempfile::tempdir().unwrap();
        // Zero-second freshness: anything already written is stale.
        let store = store(&dir, 0);

        let breaker = DrawdownBreaker::new(BreakerPolicy::default());
        store.save_breaker(&breaker.state()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));

        let loaded = store.load_breaker().unwrap().unwrap();
        assert!(!loaded.fresh);
        // The state itself is still delivered; staleness policy belongs to
        // the caller.
        assert_eq!(loaded.state.tier, BreakerTier::Normal);
    }

    #[test]
    fn test_save_overwrites_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 3600);

        let mut breaker = DrawdownBreaker::new(BreakerPolicy::default());
        store.save_breaker(&breaker.state()).unwrap();
        breaker.update(PortfolioMetrics::from_drawdown(dec!(0.25)), Utc::now());
        store.save_breaker(&breaker.state()).unwrap();

        let loaded = store.load_breaker().unwrap().unwrap();
        assert_eq!(loaded.state.tier, BreakerTier::Level5);
    }
}
