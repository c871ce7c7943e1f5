//! Durable run snapshots.
//!
//! A checkpoint is a single JSON document: generation counter, the full
//! population and archive, the epsilon vector, stagnation counters, budget
//! usage, and the RNG state. Save then load is bit-identical, so a resumed
//! run replays the same subsequent generations given a deterministic
//! surrogate and replayed agent responses.

use chrono::{DateTime, Utc};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::archive::Archive;
use crate::error::EngineError;
use crate::individual::Population;

#[derive(Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub generation: u64,
    pub population: Population,
    pub archive: Archive,
    pub epsilon: Vec<f64>,
    /// Full RNG state; restoring it continues the exact random sequence.
    pub rng: ChaCha8Rng,
    pub evaluations_used: u64,
    pub front0_stagnant_for: u64,
    pub archive_stagnant_for: u64,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Write atomically: temp file in the same directory, then rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        info!(
            path = %path.display(),
            generation = self.generation,
            archive = self.archive.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Checkpoint(format!("cannot read {}: {e}", path.display())))?;
        let checkpoint: Checkpoint = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Checkpoint(format!("corrupted checkpoint {}: {e}", path.display())))?;
        if checkpoint.epsilon.is_empty() {
            return Err(EngineError::Checkpoint(
                "checkpoint carries an empty epsilon vector".to_string(),
            ));
        }
        Ok(checkpoint)
    }
}
