//! Stable Diffusion v1.5 denoising adapter.
//!
//! Wraps the candle-transformers UNet, VAE and CLIP text encoder behind the
//! [`Denoiser`] trait, with a [`DdimScheduler`] supplying the step rule.

use candle_core::{DType, Device, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
    StableDiffusionConfig,
};
use tokenizers::Tokenizer;

use super::loader::DiffusionFiles;
use super::schedule::{DdimConfig, DdimScheduler};
use super::Denoiser;
use crate::config::GenerationConfig;
use crate::error::{Error, Result};

/// VAE latent scaling factor for SD v1.x.
const VAE_SCALE: f64 = 0.18215;

/// Latent channels of the v1.x UNet.
const LATENT_CHANNELS: usize = 4;

/// Token length of the CLIP text encoder.
const MAX_PROMPT_TOKENS: usize = 77;

/// Stable Diffusion v1.5 with a DDIM schedule.
pub struct StableDiffusion {
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
    text_model: ClipTextTransformer,
    tokenizer: Tokenizer,
    scheduler: DdimScheduler,
    pad_id: u32,
    latent_shape: (usize, usize, usize),
    device: Device,
    dtype: DType,
}

impl StableDiffusion {
    /// Builds the model from downloaded files for the task's image size and schedule.
    pub fn load(
        files: &DiffusionFiles,
        config: &GenerationConfig,
        device: &Device,
        dtype: DType,
        use_flash_attn: bool,
    ) -> Result<Self> {
        let sd_config =
            StableDiffusionConfig::v1_5(None, Some(config.height), Some(config.width));

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| Error::Tokenization(format!("Failed to load tokenizer: {e}")))?;
        let pad_id = tokenizer
            .token_to_id("<|endoftext|>")
            .ok_or_else(|| Error::Tokenization("tokenizer has no <|endoftext|> token".into()))?;

        let text_model = stable_diffusion::build_clip_transformer(
            &sd_config.clip,
            &files.text_encoder,
            device,
            DType::F32,
        )?;
        let vae = sd_config.build_vae(&files.vae, device, dtype)?;
        let unet = sd_config.build_unet(
            &files.unet,
            device,
            LATENT_CHANNELS,
            use_flash_attn,
            dtype,
        )?;

        let scheduler = DdimScheduler::new(
            config.num_inference_steps,
            &DdimConfig::default(),
            config.eta,
            config.seed,
        )?;
        let (latent_h, latent_w) = config.latent_size();

        Ok(Self {
            unet,
            vae,
            text_model,
            tokenizer,
            scheduler,
            pad_id,
            latent_shape: (LATENT_CHANNELS, latent_h, latent_w),
            device: device.clone(),
            dtype,
        })
    }
}

impl Denoiser for StableDiffusion {
    fn device(&self) -> &Device {
        &self.device
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn latent_shape(&self) -> (usize, usize, usize) {
        self.latent_shape
    }

    fn timesteps(&self) -> &[usize] {
        self.scheduler.timesteps()
    }

    fn encode_prompt(&self, prompt: &str) -> Result<Tensor> {
        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| Error::Tokenization(e.to_string()))?
            .get_ids()
            .to_vec();
        tokens.truncate(MAX_PROMPT_TOKENS);
        tokens.resize(MAX_PROMPT_TOKENS, self.pad_id);

        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        let embeddings = self.text_model.forward(&tokens)?;
        Ok(embeddings.to_dtype(self.dtype)?)
    }

    fn predict_noise(
        &self,
        latents: &Tensor,
        timestep: usize,
        hidden_states: &Tensor,
    ) -> Result<Tensor> {
        Ok(self
            .unet
            .forward(latents, timestep as f64, hidden_states)?)
    }

    fn reseed(&mut self, eta: f64, seed: Option<u64>) -> Result<()> {
        self.scheduler.reseed(eta, seed);
        Ok(())
    }

    fn step(&mut self, noise_pred: &Tensor, timestep: usize, latents: &Tensor) -> Result<Tensor> {
        self.scheduler.step(noise_pred, timestep, latents)
    }

    fn predict_original(
        &self,
        noise_pred: &Tensor,
        timestep: usize,
        latents: &Tensor,
    ) -> Result<Tensor> {
        self.scheduler.predict_original(noise_pred, timestep, latents)
    }

    fn decode(&self, latents: &Tensor) -> Result<Tensor> {
        let images = self.vae.decode(&latents.affine(1.0 / VAE_SCALE, 0.0)?)?;
        // [-1, 1] -> [0, 1]
        let images = images.to_dtype(DType::F32)?.affine(0.5, 0.5)?;
        Ok(images.clamp(0f32, 1f32)?)
    }
}
