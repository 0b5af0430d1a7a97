//! Checkpoint persistence.
//!
//! A checkpoint is a full save: the opaque emulator state blob plus the agent
//! registry at the moment of capture. One CRC-framed file per checkpoint in a
//! save directory, fingerprinted with blake3 and verified on load.
//!
//! Consistency is the arbiter's job: it only captures checkpoints between
//! turns, under its own mutual exclusion. This module just moves bytes.

pub mod codec;

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::Agent;
use crate::error::{BridgeError, BridgeResult, RuntimeError};

/// Unique checkpoint identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(Uuid);

impl CheckpointId {
    /// Creates a new random checkpoint ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a checkpoint ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Full save of emulator state plus the agent registry at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveCheckpoint {
    /// Checkpoint identity.
    pub id: CheckpointId,
    /// When the checkpoint was captured.
    pub created_at: DateTime<Utc>,
    /// Arbiter tick at capture.
    pub tick: u64,
    /// Last event-log sequence at capture.
    pub last_sequence: u64,
    /// Opaque emulator state blob.
    pub emulator_state: Vec<u8>,
    /// Registry contents at capture.
    pub agents: Vec<Agent>,
    /// blake3 hex digest of `emulator_state`.
    pub fingerprint: String,
}

impl SaveCheckpoint {
    /// Builds a checkpoint, computing the state fingerprint.
    #[must_use]
    pub fn new(tick: u64, last_sequence: u64, emulator_state: Vec<u8>, agents: Vec<Agent>) -> Self {
        let fingerprint = blake3::hash(&emulator_state).to_hex().to_string();
        Self {
            id: CheckpointId::new(),
            created_at: Utc::now(),
            tick,
            last_sequence,
            emulator_state,
            agents,
            fingerprint,
        }
    }

    /// Returns true if the stored fingerprint matches the state blob.
    #[must_use]
    pub fn fingerprint_matches(&self) -> bool {
        blake3::hash(&self.emulator_state).to_hex().to_string() == self.fingerprint
    }
}

/// Stores and retrieves checkpoints from a save directory.
#[derive(Debug, Clone)]
pub struct PersistenceManager {
    dir: PathBuf,
}

impl PersistenceManager {
    /// Opens (creating if needed) a save directory.
    ///
    /// # Errors
    /// I/O failure creating the directory.
    pub fn open(dir: impl Into<PathBuf>) -> BridgeResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The save directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes a checkpoint to its own file, fsynced.
    ///
    /// # Errors
    /// `PersistError` on serialization or I/O failure.
    pub fn store(&self, checkpoint: &SaveCheckpoint) -> BridgeResult<()> {
        let path = self.checkpoint_path(checkpoint.id);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        codec::write_header(&mut file)?;
        let encoded = codec::encode(checkpoint)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        Ok(())
    }

    /// Loads a checkpoint by id, verifying its fingerprint.
    ///
    /// # Errors
    /// [`RuntimeError::CheckpointNotFound`] for a missing id; `PersistError`
    /// for corruption (bad framing or fingerprint mismatch).
    pub fn load(&self, id: CheckpointId) -> BridgeResult<SaveCheckpoint> {
        let path = self.checkpoint_path(id);
        if !path.exists() {
            return Err(RuntimeError::CheckpointNotFound { id }.into());
        }

        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        let checkpoint: SaveCheckpoint = codec::decode(&mut reader)?;

        if checkpoint.id != id {
            return Err(BridgeError::persist(format!(
                "checkpoint file {path:?} holds id {}, expected {id}",
                checkpoint.id
            )));
        }
        if !checkpoint.fingerprint_matches() {
            return Err(BridgeError::persist(format!(
                "checkpoint {id} failed fingerprint verification"
            )));
        }

        Ok(checkpoint)
    }

    /// Lists stored checkpoint ids (unordered).
    ///
    /// # Errors
    /// I/O failure reading the directory.
    pub fn list(&self) -> BridgeResult<Vec<CheckpointId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("ckpt") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Ok(uuid) = stem.parse::<Uuid>() {
                    ids.push(CheckpointId::from_uuid(uuid));
                }
            }
        }
        Ok(ids)
    }

    fn checkpoint_path(&self, id: CheckpointId) -> PathBuf {
        self.dir.join(format!("{id}.ckpt"))
    }
}
