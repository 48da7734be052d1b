//! DDIM noise schedule.
//!
//! Timesteps use "leading" spacing with an offset, as Stable Diffusion v1.x
//! was trained with:
//!
//! ```text
//! step_ratio = num_train_timesteps / num_inference_steps
//! timesteps  = [(n-1)*ratio + offset, ..., ratio + offset, offset]
//! ```
//!
//! `step` moves `x_t` to the previous timestep; `predict_original` returns
//! the closed-form clean-sample estimate
//!
//! ```text
//! x̂₀ = (x_t − √(1 − ᾱ_t) · ε̂) / √ᾱ_t
//! ```

use candle_core::{Device, Shape, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Training-time noise schedule parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdimConfig {
    /// Number of diffusion steps used in training.
    pub num_train_timesteps: usize,
    /// First beta of the scaled-linear schedule.
    pub beta_start: f64,
    /// Last beta of the scaled-linear schedule.
    pub beta_end: f64,
    /// Offset added to every inference timestep.
    pub steps_offset: usize,
}

impl Default for DdimConfig {
    fn default() -> Self {
        // Stable Diffusion v1.5
        Self {
            num_train_timesteps: 1000,
            beta_start: 0.00085,
            beta_end: 0.012,
            steps_offset: 1,
        }
    }
}

/// DDIM scheduler with optional stochasticity (`eta`).
#[derive(Debug, Clone)]
pub struct DdimScheduler {
    timesteps: Vec<usize>,
    alphas_cumprod: Vec<f64>,
    final_alpha_cumprod: f64,
    step_ratio: usize,
    eta: f64,
    rng: StdRng,
}

impl DdimScheduler {
    /// Builds the schedule for `num_inference_steps` steps.
    pub fn new(
        num_inference_steps: usize,
        config: &DdimConfig,
        eta: f64,
        seed: Option<u64>,
    ) -> Result<Self> {
        let n = config.num_train_timesteps;
        if num_inference_steps == 0 || num_inference_steps > n {
            return Err(Error::InvalidInput(format!(
                "num_inference_steps must be in 1..={n}, got {num_inference_steps}"
            )));
        }
        let step_ratio = n / num_inference_steps;
        let top = (num_inference_steps - 1) * step_ratio + config.steps_offset;
        if top >= n {
            return Err(Error::InvalidInput(format!(
                "{num_inference_steps} steps with offset {} overrun {n} training timesteps",
                config.steps_offset
            )));
        }

        let start = config.beta_start.sqrt();
        let end = config.beta_end.sqrt();
        let mut alphas_cumprod = Vec::with_capacity(n);
        let mut acc = 1.0f64;
        for i in 0..n {
            let frac = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 };
            let beta = (start + frac * (end - start)).powi(2);
            acc *= 1.0 - beta;
            alphas_cumprod.push(acc);
        }

        let timesteps: Vec<usize> = (0..num_inference_steps)
            .rev()
            .map(|i| i * step_ratio + config.steps_offset)
            .collect();

        Ok(Self {
            timesteps,
            final_alpha_cumprod: alphas_cumprod[0],
            alphas_cumprod,
            step_ratio,
            eta,
            rng: step_rng(seed),
        })
    }

    /// Resets step stochasticity: new `eta` and a fresh noise stream.
    pub fn reseed(&mut self, eta: f64, seed: Option<u64>) {
        self.eta = eta;
        self.rng = step_rng(seed);
    }

    /// Current `eta`.
    pub fn eta(&self) -> f64 {
        self.eta
    }

    /// Inference timesteps, noisiest first.
    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    /// ᾱ at `timestep`.
    pub fn alpha_cumprod(&self, timestep: usize) -> f64 {
        self.alphas_cumprod[timestep.min(self.alphas_cumprod.len() - 1)]
    }

    fn prev_alpha_cumprod(&self, timestep: usize) -> f64 {
        match timestep.checked_sub(self.step_ratio) {
            Some(prev) => self.alpha_cumprod(prev),
            None => self.final_alpha_cumprod,
        }
    }

    /// Estimate of the clean sample from `sample` at `timestep`.
    pub fn predict_original(
        &self,
        noise_pred: &Tensor,
        timestep: usize,
        sample: &Tensor,
    ) -> Result<Tensor> {
        let alpha_prod_t = self.alpha_cumprod(timestep);
        let beta_prod_t = 1.0 - alpha_prod_t;
        let inv_sqrt_alpha = 1.0 / alpha_prod_t.sqrt();
        let scaled_sample = sample.affine(inv_sqrt_alpha, 0.0)?;
        let scaled_noise = noise_pred.affine(beta_prod_t.sqrt() * inv_sqrt_alpha, 0.0)?;
        Ok(scaled_sample.sub(&scaled_noise)?)
    }

    /// One DDIM update `x_t -> x_{t-1}`.
    pub fn step(&mut self, noise_pred: &Tensor, timestep: usize, sample: &Tensor) -> Result<Tensor> {
        let alpha_prod_t = self.alpha_cumprod(timestep);
        let alpha_prod_t_prev = self.prev_alpha_cumprod(timestep);
        let beta_prod_t = 1.0 - alpha_prod_t;
        let beta_prod_t_prev = 1.0 - alpha_prod_t_prev;

        let pred_original = self.predict_original(noise_pred, timestep, sample)?;

        let variance = (beta_prod_t_prev / beta_prod_t) * (1.0 - alpha_prod_t / alpha_prod_t_prev);
        let std_dev_t = self.eta * variance.max(0.0).sqrt();

        let direction_coef = (1.0 - alpha_prod_t_prev - std_dev_t * std_dev_t)
            .max(0.0)
            .sqrt();
        let prev_sample = pred_original
            .affine(alpha_prod_t_prev.sqrt(), 0.0)?
            .add(&noise_pred.affine(direction_coef, 0.0)?)?;

        if std_dev_t > 0.0 {
            let noise = gaussian_noise(&mut self.rng, sample.dims(), sample.device())?
                .to_dtype(sample.dtype())?;
            Ok(prev_sample.add(&noise.affine(std_dev_t, 0.0)?)?)
        } else {
            Ok(prev_sample)
        }
    }
}

fn step_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Standard-normal f32 tensor drawn from `rng`.
pub fn gaussian_noise<S: Into<Shape>>(rng: &mut StdRng, shape: S, device: &Device) -> Result<Tensor> {
    let shape = shape.into();
    let values: Vec<f32> = (0..shape.elem_count())
        .map(|_| StandardNormal.sample(&mut *rng))
        .collect();
    Ok(Tensor::from_vec(values, shape, device)?)
}
