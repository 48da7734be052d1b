//! CLIP embedding-similarity scorer.
//!
//! Scores are cosine similarities in CLIP embedding space, either against
//! the prompt's text embedding or against a fixed reference image embedding.

use candle_core::{DType, Device, Tensor};
use candle_transformers::models::clip::{ClipConfig, ClipModel};
use tokenizers::Tokenizer;

use super::{RewardScorer, ScoreContext, ScorerKind};
use crate::denoise::loader::{load_safetensors, ClipFiles};
use crate::error::{Error, Result};

const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];

/// Which similarity the scorer reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipMode {
    /// Image vs. prompt text.
    Prompt,
    /// Image vs. a reference image set before generation.
    Reference,
}

/// CLIP ViT-B/32 scorer.
pub struct ClipScorer {
    model: ClipModel,
    tokenizer: Tokenizer,
    mode: ClipMode,
    image_size: usize,
    max_tokens: usize,
    pad_id: u32,
    device: Device,
}

impl ClipScorer {
    /// Loads CLIP ViT-B/32 from downloaded files.
    pub fn load(files: &ClipFiles, mode: ClipMode, device: &Device) -> Result<Self> {
        let config = ClipConfig::vit_base_patch32();
        let vb = load_safetensors(std::slice::from_ref(&files.weights), DType::F32, device)?;
        let model = ClipModel::new(vb, &config)?;

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| Error::Tokenization(format!("Failed to load tokenizer: {e}")))?;
        let pad_id = tokenizer
            .token_to_id("<|endoftext|>")
            .ok_or_else(|| Error::Tokenization("tokenizer has no <|endoftext|> token".into()))?;

        Ok(Self {
            model,
            tokenizer,
            mode,
            image_size: config.image_size,
            max_tokens: config.text_config.max_position_embeddings,
            pad_id,
            device: device.clone(),
        })
    }

    /// Resizes and normalizes `[0, 1]` images to CLIP's input distribution.
    fn preprocess(&self, images: &Tensor) -> Result<Tensor> {
        let images = match images.rank() {
            3 => images.unsqueeze(0)?,
            4 => images.clone(),
            r => {
                return Err(Error::Scoring(format!(
                    "expected 3D or 4D image tensor, got {r}D"
                )))
            }
        };
        let images = images
            .to_device(&self.device)?
            .to_dtype(DType::F32)?
            .interpolate2d(self.image_size, self.image_size)?;

        let mean = Tensor::new(&CLIP_MEAN, &self.device)?.reshape((1, 3, 1, 1))?;
        let std = Tensor::new(&CLIP_STD, &self.device)?.reshape((1, 3, 1, 1))?;
        Ok(images.broadcast_sub(&mean)?.broadcast_div(&std)?)
    }

    fn image_embeddings(&self, images: &Tensor) -> Result<Tensor> {
        let pixels = self.preprocess(images)?;
        l2_normalize(&self.model.get_image_features(&pixels)?)
    }

    fn text_embeddings(&self, prompts: &[String]) -> Result<Tensor> {
        let mut ids = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            let encoding = self
                .tokenizer
                .encode(prompt.as_str(), true)
                .map_err(|e| Error::Tokenization(e.to_string()))?;
            let mut row = encoding.get_ids().to_vec();
            fit_context(&mut row, self.max_tokens, self.pad_id);
            ids.push(row);
        }
        let max_len = ids.iter().map(Vec::len).max().unwrap_or(0);
        let rows: Vec<Tensor> = ids
            .into_iter()
            .map(|mut row| {
                row.resize(max_len, self.pad_id);
                Tensor::new(row.as_slice(), &self.device)
            })
            .collect::<candle_core::Result<_>>()?;
        let input_ids = Tensor::stack(&rows, 0)?;
        l2_normalize(&self.model.get_text_features(&input_ids)?)
    }
}

/// Truncates `ids` to `max_len`, keeping `eos_id` as the last token.
fn fit_context(ids: &mut Vec<u32>, max_len: usize, eos_id: u32) {
    if ids.len() > max_len {
        ids.truncate(max_len);
        if let Some(last) = ids.last_mut() {
            *last = eos_id;
        }
    }
}

fn l2_normalize(v: &Tensor) -> Result<Tensor> {
    let norm = v.sqr()?.sum_keepdim(1)?.sqrt()?;
    Ok(v.broadcast_div(&norm)?)
}

/// Row-wise dot product of unit embeddings.
fn cosine(images: &Tensor, other: &Tensor) -> Result<Vec<f32>> {
    Ok(images.broadcast_mul(other)?.sum(1)?.to_vec1::<f32>()?)
}

impl RewardScorer for ClipScorer {
    fn kind(&self) -> ScorerKind {
        match self.mode {
            ClipMode::Prompt => ScorerKind::PromptConditioned,
            ClipMode::Reference => ScorerKind::ReferenceConditioned,
        }
    }

    fn score(&self, images: &Tensor, context: ScoreContext<'_>) -> Result<Vec<f32>> {
        let image_emb = self.image_embeddings(images)?;
        match context {
            ScoreContext::Prompts(prompts) => {
                let text_emb = self.text_embeddings(prompts)?;
                cosine(&image_emb, &text_emb)
            }
            ScoreContext::Reference(target) => {
                cosine(&image_emb, &target.to_device(&self.device)?)
            }
            ScoreContext::None => Err(Error::Scoring(
                "CLIP scorer needs a prompt or a reference".into(),
            )),
        }
    }

    fn encode(&self, reference: &Tensor) -> Result<Tensor> {
        self.image_embeddings(reference)
    }
}
