use std::path::PathBuf;

use anyhow::{bail, Context};
use candle_core::{DType, Device};
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bon_diffusion::denoise::loader::{download_clip, DEFAULT_CLIP_MODEL, DEFAULT_DIFFUSION_MODEL};
use bon_diffusion::output::png::load_image;
use bon_diffusion::{
    download_diffusion, BonGenerator, ClipMode, ClipScorer, GenerationConfig, GenerationTask,
    PipelineConfig, Rewarder, StableDiffusion,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Scorer {
    /// CLIP similarity between image and prompt
    ClipText,
    /// CLIP similarity between image and a target image
    ClipImage,
}

#[derive(Parser, Debug)]
#[command(name = "bon-sd")]
#[command(about = "Best-of-N block-wise guided sampling with Stable Diffusion")]
struct Args {
    /// Prompts to generate for; each gets its own output directory
    #[arg(required = true)]
    prompts: Vec<String>,

    /// Negative prompt for the unconditional branch
    #[arg(long)]
    negative_prompt: Option<String>,

    /// Pipeline config file (JSON); command-line values override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root directory for outputs
    #[arg(long)]
    project_path: Option<PathBuf>,

    /// Lanes per outer batch
    #[arg(long)]
    genbatch: Option<usize>,

    /// Attempts allowed before final scoring records the sentinel reward
    #[arg(long)]
    retry_budget: Option<usize>,

    /// Attempt counter of this run
    #[arg(long, default_value = "0")]
    num_try: usize,

    /// Index of the first output image
    #[arg(long, default_value = "0")]
    offset: usize,

    #[arg(long, default_value = "512")]
    height: usize,

    #[arg(long, default_value = "512")]
    width: usize,

    #[arg(long, default_value = "50")]
    steps: usize,

    #[arg(long, default_value = "7.5")]
    guidance_scale: f64,

    /// Candidates per lane
    #[arg(long, default_value = "5")]
    n_samples: usize,

    /// Denoising steps between selections
    #[arg(long, default_value = "5")]
    block_size: usize,

    /// Images per prompt (a multiple of genbatch)
    #[arg(long, default_value = "5")]
    num_images: usize,

    /// DDIM eta; 0 makes every step deterministic
    #[arg(long, default_value = "1.0")]
    eta: f64,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum, default_value = "clip-text")]
    scorer: Scorer,

    /// Target image for the clip-image scorer
    #[arg(long)]
    target: Option<PathBuf>,

    /// Diffusion model HuggingFace ID
    #[arg(long, default_value = DEFAULT_DIFFUSION_MODEL)]
    model: String,

    /// CLIP model HuggingFace ID for scoring
    #[arg(long, default_value = DEFAULT_CLIP_MODEL)]
    clip_model: String,

    /// Run on CPU even if a GPU is available
    #[arg(long)]
    cpu: bool,

    /// Use half precision for the UNet and VAE
    #[arg(long)]
    f16: bool,

    #[arg(long)]
    use_flash_attn: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bon_diffusion=info,warn")),
        )
        .init();

    let args = Args::parse();
    info!("bon-sd v{}", env!("CARGO_PKG_VERSION"));

    let mut pipeline = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(path) = &args.project_path {
        pipeline.project_path = path.clone();
    }
    if let Some(genbatch) = args.genbatch {
        pipeline = pipeline.genbatch(genbatch);
    }
    if let Some(retry_budget) = args.retry_budget {
        pipeline = pipeline.retry_budget(retry_budget);
    }

    let mut generation = GenerationConfig::default()
        .size(args.height, args.width)
        .steps(args.steps)
        .guidance_scale(args.guidance_scale)
        .n_samples(args.n_samples)
        .block_size(args.block_size)
        .num_images(args.num_images)
        .eta(args.eta);
    if let Some(seed) = args.seed {
        generation = generation.seed(seed);
    }
    generation.validate(pipeline.genbatch)?;

    let device = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    let dtype = if args.f16 { DType::F16 } else { DType::F32 };

    let mode = match args.scorer {
        Scorer::ClipText => ClipMode::Prompt,
        Scorer::ClipImage => ClipMode::Reference,
    };
    let clip_files = download_clip(&args.clip_model, "main")?;
    let mut rewarder = Rewarder::new(Box::new(ClipScorer::load(&clip_files, mode, &device)?));
    match (mode, &args.target) {
        (ClipMode::Reference, Some(path)) => {
            let target = load_image(path, &device)
                .with_context(|| format!("loading target image {}", path.display()))?;
            rewarder = rewarder.with_target(&target)?;
        }
        (ClipMode::Reference, None) => bail!("--scorer clip-image requires --target"),
        (ClipMode::Prompt, Some(_)) => bail!("--target is only used with --scorer clip-image"),
        (ClipMode::Prompt, None) => {}
    }

    info!(model = %args.model, "loading diffusion model");
    let files = download_diffusion(&args.model, "main")?;
    let denoiser = StableDiffusion::load(&files, &generation, &device, dtype, args.use_flash_attn)?;

    let mut generator = BonGenerator::new(denoiser, rewarder, pipeline)?;
    for prompt in &args.prompts {
        let mut task = GenerationTask::new(prompt.as_str())
            .offset(args.offset)
            .num_try(args.num_try)
            .config(generation.clone());
        if let Some(negative) = &args.negative_prompt {
            task = task.negative_prompt(negative.as_str());
        }

        let report = generator.generate(&task)?;
        info!(
            prompt = %prompt,
            saved = report.num_saved(),
            batches = report.batches.len(),
            "prompt finished"
        );
    }

    if generator.has_failed() {
        error!("one or more batches failed to persist");
        std::process::exit(1);
    }
    Ok(())
}
