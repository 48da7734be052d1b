//! Shared test doubles: a tiny deterministic denoiser and simple scorers.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bon_diffusion::{Denoiser, Error, Result, RewardScorer, ScoreContext, ScorerKind};
use candle_core::{DType, Device, Tensor};

/// Latent side length of the mock model.
pub const SIDE: usize = 4;

/// Image side length matching [`SIDE`].
pub const IMAGE_SIDE: usize = SIDE * 8;

/// A denoiser whose step shifts each row by `0.01 × row`, so within a lane
/// the highest sample index always ends up brightest.
///
/// With [`MockDenoiser::lane_aware`] the shift follows the lane-major layout
/// instead: even lanes favour the last sample, odd lanes the first.
pub struct MockDenoiser {
    device: Device,
    timesteps: Vec<usize>,
    n_samples: Option<usize>,
    /// `(batch, timestep)` of every model call.
    pub predict_calls: RefCell<Vec<(usize, usize)>>,
    /// Batch size of every scheduler step.
    pub step_batches: Vec<usize>,
    /// Batch size of every decode.
    pub decode_batches: RefCell<Vec<usize>>,
    /// `(eta, seed)` of every reseed.
    pub reseeds: Vec<(f64, Option<u64>)>,
}

impl MockDenoiser {
    pub fn new(num_steps: usize) -> Self {
        Self {
            device: Device::Cpu,
            timesteps: (0..num_steps).rev().map(|i| i * 100 + 1).collect(),
            n_samples: None,
            predict_calls: RefCell::new(Vec::new()),
            step_batches: Vec::new(),
            decode_batches: RefCell::new(Vec::new()),
            reseeds: Vec::new(),
        }
    }

    pub fn lane_aware(mut self, n_samples: usize) -> Self {
        self.n_samples = Some(n_samples);
        self
    }

    fn shift(&self, row: usize) -> f32 {
        match self.n_samples {
            Some(n) => {
                let (lane, sample) = (row / n, row % n);
                let rank = if lane % 2 == 0 { sample } else { n - 1 - sample };
                rank as f32 * 0.01
            }
            None => row as f32 * 0.01,
        }
    }
}

impl Denoiser for MockDenoiser {
    fn device(&self) -> &Device {
        &self.device
    }

    fn dtype(&self) -> DType {
        DType::F32
    }

    fn latent_shape(&self) -> (usize, usize, usize) {
        (1, SIDE, SIDE)
    }

    fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    fn encode_prompt(&self, prompt: &str) -> Result<Tensor> {
        Ok(Tensor::full(prompt.len() as f32, (1, 2), &self.device)?)
    }

    fn predict_noise(&self, latents: &Tensor, timestep: usize, hidden: &Tensor) -> Result<Tensor> {
        let batch = latents.dim(0)?;
        assert_eq!(hidden.dim(0)?, batch);
        self.predict_calls.borrow_mut().push((batch, timestep));
        Ok(latents.zeros_like()?)
    }

    fn reseed(&mut self, eta: f64, seed: Option<u64>) -> Result<()> {
        self.reseeds.push((eta, seed));
        Ok(())
    }

    fn step(&mut self, _noise: &Tensor, _timestep: usize, latents: &Tensor) -> Result<Tensor> {
        let batch = latents.dim(0)?;
        self.step_batches.push(batch);
        let shift: Vec<f32> = (0..batch).map(|r| self.shift(r)).collect();
        let shift = Tensor::from_vec(shift, (batch, 1, 1, 1), &self.device)?;
        Ok(latents.broadcast_add(&shift)?)
    }

    fn predict_original(&self, _noise: &Tensor, _timestep: usize, latents: &Tensor) -> Result<Tensor> {
        Ok(latents.clone())
    }

    fn decode(&self, latents: &Tensor) -> Result<Tensor> {
        self.decode_batches.borrow_mut().push(latents.dim(0)?);
        let gray = latents.tanh()?.affine(0.5, 0.5)?;
        Ok(Tensor::cat(&[&gray, &gray, &gray], 1)?)
    }
}

/// Mean pixel value per image.
pub struct MeanBrightness;

impl RewardScorer for MeanBrightness {
    fn kind(&self) -> ScorerKind {
        ScorerKind::Unconditioned
    }

    fn score(&self, images: &Tensor, _context: ScoreContext<'_>) -> Result<Vec<f32>> {
        Ok(images.flatten_from(1)?.mean(1)?.to_vec1::<f32>()?)
    }
}

/// Scores like [`MeanBrightness`] for the first `ok_calls` calls, then fails.
pub struct FlakyScorer {
    pub calls: Rc<Cell<usize>>,
    pub ok_calls: usize,
}

impl FlakyScorer {
    pub fn new(ok_calls: usize) -> (Self, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        (
            Self {
                calls: Rc::clone(&calls),
                ok_calls,
            },
            calls,
        )
    }
}

impl RewardScorer for FlakyScorer {
    fn kind(&self) -> ScorerKind {
        ScorerKind::Unconditioned
    }

    fn score(&self, images: &Tensor, context: ScoreContext<'_>) -> Result<Vec<f32>> {
        let n = self.calls.get();
        self.calls.set(n + 1);
        if n >= self.ok_calls {
            return Err(Error::Scoring("reward service unavailable".into()));
        }
        MeanBrightness.score(images, context)
    }
}

/// Returns the same reward for every image.
pub struct Constant(pub f32);

impl RewardScorer for Constant {
    fn kind(&self) -> ScorerKind {
        ScorerKind::Unconditioned
    }

    fn score(&self, images: &Tensor, _context: ScoreContext<'_>) -> Result<Vec<f32>> {
        Ok(vec![self.0; images.dim(0)?])
    }
}

/// `count` random-looking but fixed initial latents.
pub fn latents(count: usize) -> Tensor {
    let n = count * SIDE * SIDE;
    let values: Vec<f32> = (0..n).map(|i| ((i * 7919) % 97) as f32 / 97.0 - 0.5).collect();
    Tensor::from_vec(values, (count, 1, SIDE, SIDE), &Device::Cpu).unwrap()
}
