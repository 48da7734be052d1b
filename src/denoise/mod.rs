//! Denoising step adapters.
//!
//! This module contains:
//! - the `Denoiser` trait, the boundary to the external diffusion model
//! - classifier-free guidance and the `GuidedDenoiser` advance/preview pair
//! - a DDIM schedule with seeded step noise
//! - a Stable Diffusion v1.5 adapter and its weight loader

pub mod guidance;
pub mod loader;
pub mod schedule;
pub mod stable_diffusion;

pub use guidance::{apply_guidance, Guidance, GuidedDenoiser};
pub use loader::{download_diffusion, DiffusionFiles};
pub use schedule::{gaussian_noise, DdimConfig, DdimScheduler};
pub use stable_diffusion::StableDiffusion;

use candle_core::{DType, Device, Tensor};

use crate::error::Result;

/// A diffusion model plus its noise schedule, seen as a batched step function.
///
/// Every tensor argument is a batch along dimension 0; implementations must
/// keep row order so that the candidate-to-lane mapping survives each call.
pub trait Denoiser {
    /// Device holding the latents.
    fn device(&self) -> &Device;

    /// Latent dtype.
    fn dtype(&self) -> DType;

    /// `(channels, height, width)` of one latent.
    fn latent_shape(&self) -> (usize, usize, usize);

    /// Ordered, finite inference timesteps, noisiest first.
    fn timesteps(&self) -> &[usize];

    /// Encodes a prompt to conditioning hidden states with a leading batch of 1.
    fn encode_prompt(&self, prompt: &str) -> Result<Tensor>;

    /// Predicts the noise residual for `latents` at `timestep`.
    fn predict_noise(&self, latents: &Tensor, timestep: usize, hidden_states: &Tensor)
        -> Result<Tensor>;

    /// Resets step stochasticity for a new task: DDIM `eta` and the step-noise seed.
    fn reseed(&mut self, eta: f64, seed: Option<u64>) -> Result<()>;

    /// Moves `latents` from `timestep` to the next (less noisy) timestep.
    fn step(&mut self, noise_pred: &Tensor, timestep: usize, latents: &Tensor) -> Result<Tensor>;

    /// Estimates the fully-denoised sample from `latents` at `timestep`.
    fn predict_original(&self, noise_pred: &Tensor, timestep: usize, latents: &Tensor)
        -> Result<Tensor>;

    /// Decodes latents to `B×3×H×W` images with values in `[0, 1]`.
    fn decode(&self, latents: &Tensor) -> Result<Tensor>;
}
