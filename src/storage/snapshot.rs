use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::core::{Block, Chain};
use crate::error::{NodeError, Result};
use crate::utils::current_timestamp;

/// File name of the snapshot inside the data directory.
pub const SNAPSHOT_FILE: &str = "chain.json";

/// The single persisted document: the full chain plus the miner identity
/// and mining knobs. The UTXO ledger is never stored, it is re-folded
/// from the chain on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub chain: Vec<Block>,
    pub difficulty: u32,
    pub mining_reward: u64,
    pub miner_key: String,
    pub timestamp: i64,
}

impl Snapshot {
    /// Read a snapshot if one exists. A missing or malformed file yields
    /// `None` so the caller starts a fresh chain.
    pub fn load(path: &Path) -> Result<Option<Snapshot>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(NodeError::Io(format!(
                    "Failed to read snapshot {}: {e}",
                    path.display()
                )))
            }
        };

        match serde_json::from_str(&raw) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!(
                    "Snapshot {} is malformed, starting fresh: {e}",
                    path.display()
                );
                Ok(None)
            }
        }
    }

    /// Write through a temp file and rename, so a crash mid-write never
    /// leaves a truncated snapshot behind.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                NodeError::Io(format!(
                    "Failed to create data directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, json).map_err(|e| {
            NodeError::Io(format!(
                "Failed to write snapshot {}: {e}",
                tmp_path.display()
            ))
        })?;
        fs::rename(&tmp_path, path).map_err(|e| {
            NodeError::Io(format!(
                "Failed to move snapshot into place at {}: {e}",
                path.display()
            ))
        })?;
        Ok(())
    }
}

/// Knows where the snapshot lives and which miner key to embed, so every
/// append site can persist with one call.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    miner_key_hex: String,
}

impl SnapshotStore {
    pub fn new(path: PathBuf, miner_key_hex: String) -> SnapshotStore {
        SnapshotStore {
            path,
            miner_key_hex,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn persist(&self, chain: &Chain, mining_reward: u64) -> Result<()> {
        let snapshot = Snapshot {
            chain: chain.blocks().to_vec(),
            difficulty: chain.difficulty(),
            mining_reward,
            miner_key: self.miner_key_hex.clone(),
            timestamp: current_timestamp()?,
        };
        snapshot.write_atomic(&self.path)
    }

    /// Persist, logging instead of propagating: a failed snapshot write
    /// must never disturb the in-memory state that was just committed.
    pub fn persist_or_warn(&self, chain: &Chain, mining_reward: u64) {
        if let Err(e) = self.persist(chain, mining_reward) {
            warn!("Snapshot write failed: {e}");
        }
    }
}
