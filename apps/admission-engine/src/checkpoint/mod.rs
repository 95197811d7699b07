//! File-backed write-ahead checkpoint store.
//!
//! One JSON document per pipeline run. The run header is written before any
//! gate executes and the document is rewritten after every verdict, so a
//! crash at any point leaves a durable record of how far the run got. Writes
//! go through a temp file and an atomic rename, with `sync_all` before the
//! rename; a write failure is fatal to the run, which must halt rather than
//! proceed without an audit trail.
//!
//! Sealed documents are immutable: appending to or re-sealing one is an
//! error at the store level, independent of the in-memory guard on
//! [`PipelineRun`].

pub mod state;

pub use state::{Persisted, StateStore};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;

use crate::models::{PipelineRun, RunState};

/// Checkpoint store errors.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Filesystem failure; fatal to the run being recorded.
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Run document failed to serialize or parse.
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The on-disk document is sealed and cannot be modified.
    #[error("checkpoint for run {run_id} is sealed")]
    Sealed {
        /// The sealed run.
        run_id: String,
    },

    /// No document exists for the run.
    #[error("no checkpoint for run {run_id}")]
    NotFound {
        /// The missing run.
        run_id: String,
    },

    /// The document is older than the freshness threshold.
    #[error("checkpoint for run {run_id} is stale ({age_secs}s old)")]
    Stale {
        /// The stale run.
        run_id: String,
        /// Document age in seconds.
        age_secs: i64,
    },
}

/// Durable store of pipeline-run documents.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
    freshness: chrono::Duration,
}

impl CheckpointStore {
    /// Open (creating if needed) a store rooted at `dir`.
    ///
    /// Documents older than `freshness_secs` are rejected by [`resume`].
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Io`] if the directory cannot be created.
    ///
    /// [`resume`]: CheckpointStore::resume
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

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    /// Durably write the run header before any gate executes.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Io`] or [`CheckpointError::Serialization`] on write
    /// failure.
    pub fn begin(&self, run: &PipelineRun) -> Result<(), CheckpointError> {
        self.write_document(run)?;
        tracing::debug!(run_id = %run.run_id, symbol = %run.candidate.symbol, "Checkpoint opened");
        Ok(())
    }

    /// Rewrite the document after a verdict is appended.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Sealed`] if the on-disk document already has a
    /// terminal state; I/O and serialization errors otherwise.
    pub fn record_gate(&self, run: &PipelineRun) -> Result<(), CheckpointError> {
        self.ensure_unsealed(&run.run_id)?;
        self.write_document(run)
    }

    /// Persist the sealed run. The in-memory run must already carry its
    /// terminal state.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Sealed`] if the on-disk document was already
    /// sealed; I/O and serialization errors otherwise.
    pub fn seal(&self, run: &PipelineRun) -> Result<(), CheckpointError> {
        self.ensure_unsealed(&run.run_id)?;
        self.write_document(run)?;
        tracing::info!(
            run_id = %run.run_id,
            symbol = %run.candidate.symbol,
            terminal = run.terminal.map_or("none", |t| t.as_str()),
            reason = run.terminal_reason.map_or("none", |r| r.as_str()),
            "Checkpoint sealed"
        );
        Ok(())
    }

    /// Load a run document for audit.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::NotFound`] if no document exists.
    pub fn load(&self, run_id: &str) -> Result<PipelineRun, CheckpointError> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Err(CheckpointError::NotFound {
                run_id: run_id.to_string(),
            });
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Load a run document for resumption, rejecting stale state.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Stale`] when the document's last timestamp is
    /// older than the freshness threshold as of `now`.
    pub fn resume(&self, run_id: &str, now: DateTime<Utc>) -> Result<PipelineRun, CheckpointError> {
        let run = self.load(run_id)?;
        let last_written = run.sealed_at.unwrap_or(run.started_at);
        let age = now - last_written;
        if age > self.freshness {
            return Err(CheckpointError::Stale {
                run_id: run_id.to_string(),
                age_secs: age.num_seconds(),
            });
        }
        Ok(run)
    }

    /// Whether a sealed `admitted` run exists for `symbol` on the UTC date
    /// of `now`.
    ///
    /// This is the duplicate-execution guard; the operator force flag
    /// bypasses this check and nothing else.
    ///
    /// # Errors
    ///
    /// I/O errors while scanning the store directory.
    pub fn admitted_today(&self, symbol: &str, now: DateTime<Utc>) -> Result<bool, CheckpointError> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            // Tolerate unreadable or partial documents during the scan;
            // they can never prove a prior admission.
            let Ok(contents) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(run) = serde_json::from_str::<PipelineRun>(&contents) else {
                continue;
            };
            if run.terminal != Some(RunState::Admitted) || run.candidate.symbol != symbol {
                continue;
            }
            if let Some(sealed_at) = run.sealed_at {
                if same_utc_date(sealed_at, now) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn ensure_unsealed(&self, run_id: &str) -> Result<(), CheckpointError> {
        match self.load(run_id) {
            Ok(existing) if existing.is_sealed() => Err(CheckpointError::Sealed {
                run_id: run_id.to_string(),
            }),
            Ok(_) | Err(CheckpointError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn write_document(&self, run: &PipelineRun) -> Result<(), CheckpointError> {
        let path = self.path_for(&run.run_id);
        let json = serde_json::to_vec_pretty(run)?;
        write_atomic(&path, &json)?;
        Ok(())
    }
}

/// Write via temp file + fsync + rename so readers never see a torn
/// document.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), std::io::Error> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

fn same_utc_date(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year() && a.ordinal() == b.ordinal()
}
