//! bon-diffusion: Best-of-N block-wise guided sampling for diffusion models.
//!
//! Every output image is drawn from a pool of candidate trajectories:
//! - each lane is replicated into `n_samples` candidates
//! - every `block_size` denoising steps the candidates are previewed,
//!   decoded and scored by a reward model
//! - the best candidate per lane survives and is replicated again
//! - the final winners are decoded, re-scored and persisted with their rewards

pub mod config;
pub mod error;

pub mod denoise;
pub mod engine;
pub mod output;
pub mod pool;
pub mod reward;
pub mod selection;

pub use config::{GenerationConfig, PipelineConfig};
pub use denoise::{
    download_diffusion, DdimConfig, DdimScheduler, Denoiser, DiffusionFiles, Guidance,
    GuidedDenoiser, StableDiffusion,
};
pub use engine::{BatchReport, BonGenerator, GenerationReport, GenerationTask};
pub use error::{Error, Result};
pub use output::{OutputWriter, RewardStore, SENTINEL_REWARD};
pub use pool::{collapse, replicate, CandidatePool, PoolLayout};
pub use reward::{ClipMode, ClipScorer, RewardScorer, Rewarder, ScoreContext, ScorerKind};
pub use selection::{stable_argmax, BlockSearch, RewardGrid, SearchOutcome, SelectionEvent};
