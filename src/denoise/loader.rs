//! Model weight loading utilities.
//!
//! This module provides functions for:
//! - Downloading Stable Diffusion components from HuggingFace Hub
//! - Downloading CLIP scorer weights
//! - Creating a VarBuilder over SafeTensors files

use std::path::PathBuf;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use hf_hub::{api::sync::Api, api::sync::ApiRepo, Repo, RepoType};

use crate::error::{Error, Result};

/// Default Stable Diffusion repository.
pub const DEFAULT_DIFFUSION_MODEL: &str = "stable-diffusion-v1-5/stable-diffusion-v1-5";

/// Default CLIP repository (also provides the SD v1.5 tokenizer).
pub const DEFAULT_CLIP_MODEL: &str = "openai/clip-vit-base-patch32";

/// Paths to downloaded Stable Diffusion files.
#[derive(Debug, Clone)]
pub struct DiffusionFiles {
    /// UNet weights.
    pub unet: PathBuf,
    /// VAE weights.
    pub vae: PathBuf,
    /// CLIP text encoder weights.
    pub text_encoder: PathBuf,
    /// tokenizer.json for the text encoder.
    pub tokenizer: PathBuf,
}

/// Paths to downloaded CLIP files.
#[derive(Debug, Clone)]
pub struct ClipFiles {
    /// Full CLIP model weights.
    pub weights: PathBuf,
    /// tokenizer.json.
    pub tokenizer: PathBuf,
}

fn repo(model_id: &str, revision: &str) -> Result<ApiRepo> {
    let api = Api::new().map_err(|e| Error::ModelLoad(format!("Failed to create HF API: {e}")))?;
    Ok(api.repo(Repo::with_revision(
        model_id.to_string(),
        RepoType::Model,
        revision.to_string(),
    )))
}

fn fetch(repo: &ApiRepo, filename: &str) -> Result<PathBuf> {
    repo.get(filename)
        .map_err(|e| Error::ModelLoad(format!("Failed to download {filename}: {e}")))
}

/// Downloads the UNet, VAE and text encoder of a Stable Diffusion v1.x repository.
///
/// The tokenizer is taken from [`DEFAULT_CLIP_MODEL`], whose vocabulary
/// matches the v1.x text encoder and ships a `tokenizer.json`.
pub fn download_diffusion(model_id: &str, revision: &str) -> Result<DiffusionFiles> {
    let sd = repo(model_id, revision)?;
    let clip = repo(DEFAULT_CLIP_MODEL, "main")?;

    Ok(DiffusionFiles {
        unet: fetch(&sd, "unet/diffusion_pytorch_model.safetensors")?,
        vae: fetch(&sd, "vae/diffusion_pytorch_model.safetensors")?,
        text_encoder: fetch(&sd, "text_encoder/model.safetensors")?,
        tokenizer: fetch(&clip, "tokenizer.json")?,
    })
}

/// Downloads CLIP weights and tokenizer.
pub fn download_clip(model_id: &str, revision: &str) -> Result<ClipFiles> {
    let clip = repo(model_id, revision)?;
    Ok(ClipFiles {
        weights: fetch(&clip, "model.safetensors")?,
        tokenizer: fetch(&clip, "tokenizer.json")?,
    })
}

/// Creates a VarBuilder from SafeTensors files.
///
/// # Safety
///
/// Uses memory-mapped file access. This is safe as long as the files are not
/// modified while being read.
#[allow(unsafe_code)]
pub fn load_safetensors(
    paths: &[PathBuf],
    dtype: DType,
    device: &Device,
) -> Result<VarBuilder<'static>> {
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(paths, dtype, device)? };
    Ok(vb)
}
