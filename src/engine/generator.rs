//! Best-of-N generation orchestrator.
//!
//! The BonGenerator drives a task's outer batches through the block search
//! and hands each batch's winners to persistence:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       BonGenerator                          │
//! └─────────────────────────────────────────────────────────────┘
//!                            │ generate(task)
//!                            ▼
//!                 validate + encode prompt + sample latents
//!                            │
//!            ┌───────────────┴───── for batch in 0..num_batch
//!            ▼
//!    latents[batch] ──replicate──► BlockSearch::run
//!                                        │
//!                                        ▼
//!                       OutputWriter::save_batch + record
//!                                        │
//!                         error? ── mark failed, next batch
//! ```

use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::config::{GenerationConfig, PipelineConfig, LATENT_DOWNSAMPLE};
use crate::denoise::{gaussian_noise, Denoiser, Guidance, GuidedDenoiser};
use crate::error::{Error, Result};
use crate::output::OutputWriter;
use crate::pool::{CandidatePool, PoolLayout};
use crate::reward::Rewarder;
use crate::selection::{BlockSearch, SearchOutcome};

/// One generation call.
#[derive(Debug, Clone)]
pub struct GenerationTask {
    /// Prompt; also names the output directory.
    pub prompt: String,
    /// Prompt for the unconditional branch (empty when `None`).
    pub negative_prompt: Option<String>,
    /// Index of the first output image.
    pub offset: usize,
    /// Attempt counter for the final-scoring retry policy.
    pub num_try: usize,
    /// Generation parameters.
    pub config: GenerationConfig,
    /// Pre-sampled initial latents, `num_images_per_prompt` rows.
    pub latents: Option<Tensor>,
}

impl GenerationTask {
    /// Create a task with default settings.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            offset: 0,
            num_try: 0,
            config: GenerationConfig::default(),
            latents: None,
        }
    }

    /// Set the negative prompt.
    pub fn negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative_prompt.into());
        self
    }

    /// Set the output start offset.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Set the attempt counter.
    pub fn num_try(mut self, num_try: usize) -> Self {
        self.num_try = num_try;
        self
    }

    /// Set the generation parameters.
    pub fn config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    /// Use pre-sampled initial latents.
    pub fn latents(mut self, latents: Tensor) -> Self {
        self.latents = Some(latents);
        self
    }

    /// Rejects malformed arguments.
    pub fn validate(&self, genbatch: usize) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::InvalidInput("prompt must not be empty".into()));
        }
        if self.prompt.contains(['/', '\\', '\0']) || self.prompt == "." || self.prompt == ".." {
            return Err(Error::InvalidInput(format!(
                "prompt {:?} cannot be used as a directory name",
                self.prompt
            )));
        }
        self.config.validate(genbatch)
    }
}

/// Outcome of one outer batch.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Outer batch index.
    pub batch_index: usize,
    /// Output index of the batch's first lane.
    pub start: usize,
    /// Winning rewards from the terminal in-loop selection.
    pub selection_record: Vec<f32>,
    /// Number of selection events.
    pub num_selections: usize,
    /// Rewards written to the store; `None` when persistence failed.
    pub saved_rewards: Option<Vec<f32>>,
}

impl BatchReport {
    /// Whether the batch was persisted.
    pub fn is_saved(&self) -> bool {
        self.saved_rewards.is_some()
    }
}

/// Outcome of a task.
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    /// Whether any outer batch failed to persist.
    pub failed: bool,
    /// Per-batch outcomes in order.
    pub batches: Vec<BatchReport>,
}

impl GenerationReport {
    /// Number of batches that were persisted.
    pub fn num_saved(&self) -> usize {
        self.batches.iter().filter(|b| b.is_saved()).count()
    }
}

/// Best-of-N generator.
///
/// Owns the denoiser and the configured reward model for its lifetime.
pub struct BonGenerator<D: Denoiser> {
    denoiser: D,
    rewarder: Rewarder,
    config: PipelineConfig,
    writer: OutputWriter,
    /// Set once any batch of any task fails to persist.
    failed: bool,
}

impl<D: Denoiser> BonGenerator<D> {
    /// Create a generator.
    pub fn new(denoiser: D, rewarder: Rewarder, config: PipelineConfig) -> Result<Self> {
        if config.genbatch == 0 {
            return Err(Error::Config("genbatch must be at least 1".into()));
        }
        let writer = OutputWriter::new(&config);
        Ok(Self {
            denoiser,
            rewarder,
            config,
            writer,
            failed: false,
        })
    }

    /// The underlying denoiser.
    pub fn denoiser(&self) -> &D {
        &self.denoiser
    }

    /// The configured reward model.
    pub fn rewarder(&self) -> &Rewarder {
        &self.rewarder
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Output writer.
    pub fn writer(&self) -> &OutputWriter {
        &self.writer
    }

    /// Whether any batch has failed since this generator was created.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Runs a task.
    ///
    /// Errors before or during denoising abort the task. A batch whose
    /// persistence fails is reported and skipped.
    pub fn generate(&mut self, task: &GenerationTask) -> Result<GenerationReport> {
        self.run(task, None)
    }

    /// Runs a task, calling `callback(step_index, timestep, pool)` every
    /// `callback_steps` steps.
    pub fn generate_with_callback(
        &mut self,
        task: &GenerationTask,
        mut callback: impl FnMut(usize, usize, &Tensor),
    ) -> Result<GenerationReport> {
        self.run(task, Some(&mut callback))
    }

    fn run(
        &mut self,
        task: &GenerationTask,
        mut callback: Option<&mut dyn FnMut(usize, usize, &Tensor)>,
    ) -> Result<GenerationReport> {
        let genbatch = self.config.genbatch;
        task.validate(genbatch)?;
        let cfg = &task.config;
        let num_steps = self.denoiser.timesteps().len();
        if num_steps != cfg.num_inference_steps {
            return Err(Error::InvalidInput(format!(
                "denoiser schedule has {num_steps} steps, task asks for {}",
                cfg.num_inference_steps
            )));
        }

        let (_, latent_h, latent_w) = self.denoiser.latent_shape();
        if cfg.latent_size() != (latent_h, latent_w) {
            return Err(Error::InvalidInput(format!(
                "denoiser produces {}x{} images, task asks for {}x{}",
                latent_w * LATENT_DOWNSAMPLE,
                latent_h * LATENT_DOWNSAMPLE,
                cfg.width,
                cfg.height
            )));
        }

        let layout = PoolLayout::new(cfg.n_samples, genbatch)?;
        let num_batch = cfg.num_batches(genbatch);
        let guidance = self.guidance(task)?;

        // One stream seeds the initial latents, then the step noise.
        let mut rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let latents = self.prepare_latents(task, &mut rng)?;
        let step_seed = cfg.seed.map(|_| rng.gen::<u64>());
        self.denoiser.reseed(cfg.eta, step_seed)?;

        info!(
            prompt = %task.prompt,
            num_batch,
            genbatch,
            n_samples = cfg.n_samples,
            block_size = cfg.block_size,
            steps = num_steps,
            "starting best-of-n generation"
        );

        let mut report = GenerationReport::default();
        for batch_index in 0..num_batch {
            let lanes = latents.narrow(0, batch_index * genbatch, genbatch)?;
            let pool = CandidatePool::from_lanes(&lanes, layout)?;

            let mut search = BlockSearch::new(layout, cfg.block_size)?;
            if let Some(cb) = callback.as_mut() {
                search = search.with_callback(cfg.callback_steps, |i, t, x| (**cb)(i, t, x));
            }
            let mut guided = GuidedDenoiser::new(&mut self.denoiser, &guidance);
            let SearchOutcome {
                states,
                record,
                selections,
            } = search.run(&mut guided, &self.rewarder, pool, &task.prompt)?;

            let start = batch_index * genbatch + task.offset;
            let saved = self
                .writer
                .save_batch(
                    &self.denoiser,
                    &self.rewarder,
                    &states,
                    &task.prompt,
                    start,
                    task.num_try,
                )
                .and_then(|rewards| {
                    self.writer.record(&task.prompt, &rewards)?;
                    Ok(rewards)
                });

            let saved_rewards = match saved {
                Ok(rewards) => {
                    info!(batch = batch_index, start, rewards = ?rewards, "batch saved");
                    Some(rewards)
                }
                Err(e) => {
                    warn!(batch = batch_index, start, error = %e, "batch failed to persist");
                    self.failed = true;
                    report.failed = true;
                    None
                }
            };

            report.batches.push(BatchReport {
                batch_index,
                start,
                selection_record: record,
                num_selections: selections.len(),
                saved_rewards,
            });
        }

        Ok(report)
    }

    /// Prompt conditioning, with the unconditional branch when guidance is on.
    fn guidance(&self, task: &GenerationTask) -> Result<Guidance> {
        let cond = self.denoiser.encode_prompt(&task.prompt)?;
        if task.config.do_classifier_free_guidance() {
            let negative = task.negative_prompt.as_deref().unwrap_or("");
            let uncond = self.denoiser.encode_prompt(negative)?;
            Ok(Guidance::new(cond, uncond, task.config.guidance_scale))
        } else {
            Ok(Guidance::unguided(cond))
        }
    }

    /// Initial latents for every output image of the task.
    fn prepare_latents(&self, task: &GenerationTask, rng: &mut StdRng) -> Result<Tensor> {
        let (c, h, w) = self.denoiser.latent_shape();
        let n = task.config.num_images_per_prompt;

        let latents = match &task.latents {
            Some(latents) => {
                if latents.dims() != [n, c, h, w] {
                    return Err(Error::InvalidInput(format!(
                        "latents must have shape {:?}, got {:?}",
                        [n, c, h, w],
                        latents.dims()
                    )));
                }
                latents.to_device(self.denoiser.device())?
            }
            None => gaussian_noise(rng, (n, c, h, w), self.denoiser.device())?,
        };
        Ok(latents.to_dtype(self.denoiser.dtype())?)
    }
}
