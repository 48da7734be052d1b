//! Per-prompt reward store.
//!
//! `rewards.json` is a flat JSON list of per-lane rewards in output-index
//! order. Appending reads the whole list, extends it and rewrites the file,
//! so a prompt directory must have a single writer at a time.
//!
//! JSON has no infinities: the sentinel reward is stored as `null` and read
//! back as `f32::NEG_INFINITY`. `NaN` and `+inf` have no encoding and are
//! rejected.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// File name of the reward list inside a prompt directory.
pub const REWARDS_FILE: &str = "rewards.json";

/// Reward list for one prompt directory.
#[derive(Debug, Clone)]
pub struct RewardStore {
    path: PathBuf,
}

impl RewardStore {
    /// Store inside `prompt_dir`.
    pub fn open(prompt_dir: &Path) -> Self {
        Self {
            path: prompt_dir.join(REWARDS_FILE),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All recorded rewards; empty when the file does not exist yet.
    pub fn load(&self) -> Result<Vec<f32>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let entries: Vec<Option<f32>> = serde_json::from_str(&content)?;
        Ok(entries
            .into_iter()
            .map(|r| r.unwrap_or(f32::NEG_INFINITY))
            .collect())
    }

    /// Appends `rewards` and returns the new list length.
    ///
    /// Nothing is written if any reward is `NaN` or `+inf`.
    pub fn append(&self, rewards: &[f32]) -> Result<usize> {
        if let Some(bad) = rewards
            .iter()
            .find(|r| !r.is_finite() && **r != f32::NEG_INFINITY)
        {
            return Err(Error::Scoring(format!("cannot record reward {bad}")));
        }
        let mut entries = self.load()?;
        entries.extend_from_slice(rewards);

        let encoded: Vec<Option<f32>> = entries
            .iter()
            .map(|&r| r.is_finite().then_some(r))
            .collect();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string(&encoded)?)?;
        Ok(entries.len())
    }
}
