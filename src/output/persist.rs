//! Final output persistence.
//!
//! For each finished batch:
//!
//! 1. decode the final latents,
//! 2. score the decoded images again so the recorded reward matches the
//!    saved image,
//! 3. write `<project>/<prompt>/<start + lane>.png`,
//! 4. append the rewards to `<project>/<prompt>/rewards.json`.
//!
//! If step 2 fails while `num_try < retry_budget` the error propagates so the
//! caller can rerun the task with a higher attempt counter. Once the budget
//! is used up every lane is recorded with the sentinel `-inf` instead.

use std::path::PathBuf;

use candle_core::Tensor;
use tracing::{debug, warn};

use super::png::{save_png, to_rgb_images};
use super::store::RewardStore;
use crate::config::PipelineConfig;
use crate::denoise::Denoiser;
use crate::error::{Error, Result};
use crate::reward::Rewarder;

/// Reward recorded for a lane whose final scoring permanently failed.
pub const SENTINEL_REWARD: f32 = f32::NEG_INFINITY;

/// Writes final images and reward records.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    project_path: PathBuf,
    retry_budget: usize,
}

impl OutputWriter {
    /// Writer for the pipeline's project directory and retry budget.
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            project_path: config.project_path.clone(),
            retry_budget: config.retry_budget,
        }
    }

    /// Output directory for `prompt`.
    pub fn prompt_dir(&self, prompt: &str) -> PathBuf {
        self.project_path.join(prompt)
    }

    /// Reward store for `prompt`.
    pub fn store(&self, prompt: &str) -> RewardStore {
        RewardStore::open(&self.prompt_dir(prompt))
    }

    /// Scores `images`, applying the retry/sentinel policy on failure.
    pub fn score_or_sentinel(
        &self,
        rewarder: &Rewarder,
        images: &Tensor,
        prompt: &str,
        num_try: usize,
    ) -> Result<Vec<f32>> {
        match rewarder.score(images, prompt) {
            Ok(rewards) => Ok(rewards),
            Err(e) if num_try < self.retry_budget => {
                warn!(attempt = num_try, budget = self.retry_budget, error = %e, "final scoring failed");
                Err(Error::ScoringRetry {
                    attempt: num_try,
                    budget: self.retry_budget,
                })
            }
            Err(e) => {
                warn!(
                    attempt = num_try,
                    budget = self.retry_budget,
                    error = %e,
                    "final scoring failed with retry budget exhausted, recording sentinel"
                );
                Ok(vec![SENTINEL_REWARD; images.dim(0)?])
            }
        }
    }

    /// Decodes, re-scores and writes one batch of final latents.
    ///
    /// Returns the rewards to record, one per lane.
    pub fn save_batch<D: Denoiser + ?Sized>(
        &self,
        denoiser: &D,
        rewarder: &Rewarder,
        latents: &Tensor,
        prompt: &str,
        start: usize,
        num_try: usize,
    ) -> Result<Vec<f32>> {
        let images = denoiser.decode(latents)?;
        let rewards = self.score_or_sentinel(rewarder, &images, prompt, num_try)?;

        let dir = self.prompt_dir(prompt);
        std::fs::create_dir_all(&dir)?;
        for (offset, image) in to_rgb_images(&images)?.iter().enumerate() {
            let path = dir.join(format!("{}.png", start + offset));
            save_png(image, &path)?;
            debug!(path = %path.display(), "saved image");
        }

        Ok(rewards)
    }

    /// Appends a batch's rewards to the prompt's store; returns the new length.
    pub fn record(&self, prompt: &str, rewards: &[f32]) -> Result<usize> {
        self.store(prompt).append(rewards)
    }
}
