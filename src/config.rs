//! Configuration types for bon-diffusion.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pipeline-wide configuration, fixed for the lifetime of a generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of lanes processed together per outer batch.
    pub genbatch: usize,
    /// Attempts allowed before post-loop scoring falls back to the sentinel reward.
    pub retry_budget: usize,
    /// Root directory for per-prompt outputs.
    pub project_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            genbatch: 5,
            retry_budget: 0,
            project_path: PathBuf::from("outputs"),
        }
    }
}

impl PipelineConfig {
    /// Create a config writing under `project_path`.
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self {
            project_path: project_path.into(),
            ..Default::default()
        }
    }

    /// Set the number of lanes per outer batch.
    pub fn genbatch(mut self, genbatch: usize) -> Self {
        self.genbatch = genbatch;
        self
    }

    /// Set the retry budget.
    pub fn retry_budget(mut self, retry_budget: usize) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    /// Loads a pipeline config from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&content)?;
        if config.genbatch == 0 {
            return Err(Error::Config("genbatch must be at least 1".into()));
        }
        Ok(config)
    }
}

/// Pixels per latent cell along each spatial axis.
pub const LATENT_DOWNSAMPLE: usize = 8;

/// Per-task generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Output image height in pixels.
    pub height: usize,
    /// Output image width in pixels.
    pub width: usize,
    /// Number of denoising steps in the schedule.
    pub num_inference_steps: usize,
    /// Classifier-free guidance scale (guidance is off at 1.0 or below).
    pub guidance_scale: f64,
    /// Competing candidates spawned per lane per block (BoN width).
    pub n_samples: usize,
    /// Denoising steps between two selection events.
    pub block_size: usize,
    /// Final images written per prompt.
    pub num_images_per_prompt: usize,
    /// DDIM stochasticity (0.0 is deterministic).
    pub eta: f64,
    /// Seed for initial latents and step noise.
    pub seed: Option<u64>,
    /// Step callback interval.
    pub callback_steps: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            height: 512,
            width: 512,
            num_inference_steps: 50,
            guidance_scale: 7.5,
            n_samples: 5,
            block_size: 5,
            num_images_per_prompt: 5,
            eta: 1.0,
            seed: None,
            callback_steps: 1,
        }
    }
}

impl GenerationConfig {
    /// Set the output dimensions.
    pub fn size(mut self, height: usize, width: usize) -> Self {
        self.height = height;
        self.width = width;
        self
    }

    /// Set the number of denoising steps.
    pub fn steps(mut self, num_inference_steps: usize) -> Self {
        self.num_inference_steps = num_inference_steps;
        self
    }

    /// Set the guidance scale.
    pub fn guidance_scale(mut self, guidance_scale: f64) -> Self {
        self.guidance_scale = guidance_scale;
        self
    }

    /// Set the BoN width.
    pub fn n_samples(mut self, n_samples: usize) -> Self {
        self.n_samples = n_samples;
        self
    }

    /// Set the block size.
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the number of images per prompt.
    pub fn num_images(mut self, num_images_per_prompt: usize) -> Self {
        self.num_images_per_prompt = num_images_per_prompt;
        self
    }

    /// Set DDIM eta.
    pub fn eta(mut self, eta: f64) -> Self {
        self.eta = eta;
        self
    }

    /// Set the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the step callback interval.
    pub fn callback_steps(mut self, callback_steps: usize) -> Self {
        self.callback_steps = callback_steps;
        self
    }

    /// `(height, width)` of the latent grid.
    pub fn latent_size(&self) -> (usize, usize) {
        (self.height / LATENT_DOWNSAMPLE, self.width / LATENT_DOWNSAMPLE)
    }

    /// Whether classifier-free guidance is active.
    pub fn do_classifier_free_guidance(&self) -> bool {
        self.guidance_scale > 1.0
    }

    /// Number of outer batches for `genbatch` lanes each.
    pub fn num_batches(&self, genbatch: usize) -> usize {
        self.num_images_per_prompt / genbatch
    }

    /// Rejects malformed arguments before any work begins.
    pub fn validate(&self, genbatch: usize) -> Result<()> {
        if genbatch == 0 {
            return Err(Error::InvalidInput("genbatch must be at least 1".into()));
        }
        if self.height % LATENT_DOWNSAMPLE != 0
            || self.width % LATENT_DOWNSAMPLE != 0
            || self.height == 0
            || self.width == 0
        {
            return Err(Error::InvalidInput(format!(
                "height and width must be positive multiples of {LATENT_DOWNSAMPLE}, got {}x{}",
                self.height, self.width
            )));
        }
        if self.num_inference_steps == 0 {
            return Err(Error::InvalidInput(
                "num_inference_steps must be at least 1".into(),
            ));
        }
        if self.n_samples == 0 {
            return Err(Error::InvalidInput("n_samples must be at least 1".into()));
        }
        if self.block_size == 0 {
            return Err(Error::InvalidInput("block_size must be at least 1".into()));
        }
        if self.callback_steps == 0 {
            return Err(Error::InvalidInput(
                "callback_steps must be a positive integer".into(),
            ));
        }
        if self.num_images_per_prompt == 0 || self.num_images_per_prompt % genbatch != 0 {
            return Err(Error::InvalidInput(format!(
                "num_images_per_prompt ({}) must be a positive multiple of genbatch ({genbatch})",
                self.num_images_per_prompt
            )));
        }
        if self.eta.is_nan() || self.eta < 0.0 {
            return Err(Error::InvalidInput(format!("eta must be >= 0, got {}", self.eta)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        let config = GenerationConfig::default();
        assert!(config.validate(5).is_ok());
        assert_eq!(config.num_batches(5), 1);
    }

    #[test]
    fn test_images_must_divide_by_genbatch() {
        let config = GenerationConfig::default().num_images(6);
        assert!(matches!(config.validate(4), Err(Error::InvalidInput(_))));
        assert!(config.validate(3).is_ok());
        assert_eq!(config.num_batches(3), 2);
    }

    #[test]
    fn test_rejects_bad_dimensions() {
        let config = GenerationConfig::default().size(500, 512);
        assert!(config.validate(5).is_err());
    }

    #[test]
    fn test_rejects_zero_callback_interval() {
        let config = GenerationConfig::default().callback_steps(0);
        assert!(config.validate(5).is_err());
    }

    #[test]
    fn test_guidance_threshold() {
        assert!(GenerationConfig::default().do_classifier_free_guidance());
        assert!(!GenerationConfig::default()
            .guidance_scale(1.0)
            .do_classifier_free_guidance());
    }
}
