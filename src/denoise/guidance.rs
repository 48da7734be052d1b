//! Classifier-free guidance.
//!
//! With guidance active the pool is evaluated twice in one forward pass:
//!
//! ```text
//! input   = [pool ; pool]                      (2B rows)
//! hidden  = [uncond × B ; cond × B]
//! noise   = model(input, t, hidden) -> [ε_u ; ε_c]
//! guided  = ε_u + scale · (ε_c − ε_u)
//! ```

use candle_core::Tensor;

use super::Denoiser;
use crate::error::{Error, Result};

/// Linear extrapolation from the unconditional towards the conditional estimate.
pub fn apply_guidance(uncond: &Tensor, cond: &Tensor, scale: f64) -> Result<Tensor> {
    let diff = cond.sub(uncond)?;
    Ok(uncond.add(&diff.affine(scale, 0.0)?)?)
}

/// Prompt conditioning for a task.
#[derive(Debug, Clone)]
pub struct Guidance {
    cond: Tensor,
    uncond: Option<Tensor>,
    scale: f64,
}

impl Guidance {
    /// Conditioning with guidance; `uncond` is ignored when `scale <= 1`.
    pub fn new(cond: Tensor, uncond: Tensor, scale: f64) -> Self {
        let uncond = (scale > 1.0).then_some(uncond);
        Self {
            cond,
            uncond,
            scale,
        }
    }

    /// Conditional-only evaluation.
    pub fn unguided(cond: Tensor) -> Self {
        Self {
            cond,
            uncond: None,
            scale: 1.0,
        }
    }

    /// Whether classifier-free guidance is applied.
    pub fn is_enabled(&self) -> bool {
        self.uncond.is_some()
    }

    /// Guidance scale.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Hidden states matching a model input of `batch` rows per branch.
    pub fn hidden_states(&self, batch: usize) -> Result<Tensor> {
        let cond = Tensor::cat(&vec![&self.cond; batch], 0)?;
        match &self.uncond {
            Some(uncond) => {
                let uncond = Tensor::cat(&vec![uncond; batch], 0)?;
                Ok(Tensor::cat(&[&uncond, &cond], 0)?)
            }
            None => Ok(cond),
        }
    }
}

/// A denoiser bound to one task's guidance, exposing the two pool operations
/// the block search needs.
pub struct GuidedDenoiser<'a, D: Denoiser + ?Sized> {
    denoiser: &'a mut D,
    guidance: &'a Guidance,
}

impl<'a, D: Denoiser + ?Sized> GuidedDenoiser<'a, D> {
    /// Bind `denoiser` to `guidance`.
    pub fn new(denoiser: &'a mut D, guidance: &'a Guidance) -> Self {
        Self { denoiser, guidance }
    }

    /// Timesteps of the underlying schedule.
    pub fn timesteps(&self) -> &[usize] {
        self.denoiser.timesteps()
    }

    /// Guided noise estimate for `pool` at `timestep`.
    fn noise(&self, pool: &Tensor, timestep: usize) -> Result<Tensor> {
        let batch = pool.dim(0)?;
        let hidden = self.guidance.hidden_states(batch)?;
        if self.guidance.is_enabled() {
            let input = Tensor::cat(&[pool, pool], 0)?;
            let pred = self.denoiser.predict_noise(&input, timestep, &hidden)?;
            let halves = pred.chunk(2, 0)?;
            apply_guidance(&halves[0], &halves[1], self.guidance.scale())
        } else {
            self.denoiser.predict_noise(pool, timestep, &hidden)
        }
    }

    fn timestep_at(&self, step_index: usize) -> Result<usize> {
        self.denoiser
            .timesteps()
            .get(step_index)
            .copied()
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "step {step_index} is outside a schedule of {} steps",
                    self.denoiser.timesteps().len()
                ))
            })
    }

    /// Runs step `step_index` of the schedule on the whole pool.
    pub fn advance(&mut self, pool: &Tensor, step_index: usize) -> Result<Tensor> {
        let t = self.timestep_at(step_index)?;
        let noise = self.noise(pool, t)?;
        self.denoiser.step(&noise, t, pool)
    }

    /// Fully-denoised estimate of a pool that has just completed step `step_index`.
    ///
    /// The pool now sits at the following timestep, so the model is queried
    /// there. Not defined after the last step.
    pub fn preview(&mut self, pool: &Tensor, step_index: usize) -> Result<Tensor> {
        let next_t = self.timestep_at(step_index + 1)?;
        let noise = self.noise(pool, next_t)?;
        self.denoiser.predict_original(&noise, next_t, pool)
    }

    /// Decodes latents through the underlying model.
    pub fn decode(&self, latents: &Tensor) -> Result<Tensor> {
        self.denoiser.decode(latents)
    }
}
