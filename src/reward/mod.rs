//! Reward scoring.
//!
//! A scorer maps a batch of decoded images to one scalar per image. What
//! else it needs is declared up front by its [`ScorerKind`]:
//!
//! | kind                  | context passed to `score`        |
//! |-----------------------|----------------------------------|
//! | `PromptConditioned`   | the prompt, once per image       |
//! | `ReferenceConditioned`| the encoded target reference     |
//! | `Unconditioned`       | nothing                          |
//!
//! [`Rewarder`] owns the configured scorer and, for reference-conditioned
//! scorers, the target fixed before generation.

pub mod clip;

pub use clip::{ClipMode, ClipScorer};

use candle_core::Tensor;

use crate::error::{Error, Result};

/// What context a scorer consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScorerKind {
    /// Reward depends on the text prompt and the image.
    PromptConditioned,
    /// Reward depends on a fixed reference (image or embedding) and the image.
    ReferenceConditioned,
    /// Reward depends on the image only.
    Unconditioned,
}

/// Context handed to a scorer, matching its kind.
#[derive(Debug, Clone, Copy)]
pub enum ScoreContext<'a> {
    /// One prompt per image.
    Prompts(&'a [String]),
    /// Encoded target reference.
    Reference(&'a Tensor),
    /// No context.
    None,
}

/// A pluggable reward model.
pub trait RewardScorer {
    /// Context this scorer requires.
    fn kind(&self) -> ScorerKind;

    /// Scores `images` (`B×3×H×W`, values in `[0, 1]`), one reward per image in order.
    fn score(&self, images: &Tensor, context: ScoreContext<'_>) -> Result<Vec<f32>>;

    /// Encodes a reference image into the form `score` expects.
    ///
    /// Scorers that compare against raw images keep the default.
    fn encode(&self, reference: &Tensor) -> Result<Tensor> {
        Ok(reference.clone())
    }
}

/// The configured scorer plus its fixed target.
pub struct Rewarder {
    scorer: Box<dyn RewardScorer>,
    kind: ScorerKind,
    target: Option<Tensor>,
}

impl Rewarder {
    /// Wrap a scorer.
    pub fn new(scorer: Box<dyn RewardScorer>) -> Self {
        let kind = scorer.kind();
        Self {
            scorer,
            kind,
            target: None,
        }
    }

    /// Fixes the reference target, encoded through the scorer.
    pub fn with_target(mut self, reference: &Tensor) -> Result<Self> {
        if self.kind != ScorerKind::ReferenceConditioned {
            return Err(Error::Config(format!(
                "{:?} scorer does not take a target",
                self.kind
            )));
        }
        self.target = Some(self.scorer.encode(reference)?);
        Ok(self)
    }

    /// Kind of the configured scorer.
    pub fn kind(&self) -> ScorerKind {
        self.kind
    }

    /// Encoded target, if set.
    pub fn target(&self) -> Option<&Tensor> {
        self.target.as_ref()
    }

    /// Scores `images` generated for `prompt`.
    pub fn score(&self, images: &Tensor, prompt: &str) -> Result<Vec<f32>> {
        let batch = images.dim(0)?;
        let rewards = match self.kind {
            ScorerKind::PromptConditioned => {
                let prompts = vec![prompt.to_string(); batch];
                self.scorer.score(images, ScoreContext::Prompts(&prompts))?
            }
            ScorerKind::ReferenceConditioned => {
                let target = self.target.as_ref().ok_or(Error::MissingTarget)?;
                self.scorer.score(images, ScoreContext::Reference(target))?
            }
            ScorerKind::Unconditioned => self.scorer.score(images, ScoreContext::None)?,
        };

        if rewards.len() != batch {
            return Err(Error::Scoring(format!(
                "scorer returned {} rewards for {batch} images",
                rewards.len()
            )));
        }
        Ok(rewards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    struct PromptLength;

    impl RewardScorer for PromptLength {
        fn kind(&self) -> ScorerKind {
            ScorerKind::PromptConditioned
        }

        fn score(&self, _images: &Tensor, context: ScoreContext<'_>) -> Result<Vec<f32>> {
            match context {
                ScoreContext::Prompts(prompts) => {
                    Ok(prompts.iter().map(|p| p.len() as f32).collect())
                }
                _ => Err(Error::Scoring("expected prompts".into())),
            }
        }
    }

    struct TargetSum;

    impl RewardScorer for TargetSum {
        fn kind(&self) -> ScorerKind {
            ScorerKind::ReferenceConditioned
        }

        fn score(&self, images: &Tensor, context: ScoreContext<'_>) -> Result<Vec<f32>> {
            let ScoreContext::Reference(target) = context else {
                return Err(Error::Scoring("expected reference".into()));
            };
            let t = target.sum_all()?.to_scalar::<f32>()?;
            Ok(vec![t; images.dim(0)?])
        }

        fn encode(&self, reference: &Tensor) -> Result<Tensor> {
            Ok(reference.affine(2.0, 0.0)?)
        }
    }

    fn images(n: usize) -> Tensor {
        Tensor::zeros((n, 3, 2, 2), DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_prompt_context_is_repeated_per_image() {
        let rewarder = Rewarder::new(Box::new(PromptLength));
        assert_eq!(rewarder.kind(), ScorerKind::PromptConditioned);
        assert_eq!(rewarder.score(&images(3), "cat").unwrap(), vec![3.0; 3]);
    }

    #[test]
    fn test_reference_requires_target() {
        let rewarder = Rewarder::new(Box::new(TargetSum));
        assert!(matches!(
            rewarder.score(&images(1), "x"),
            Err(Error::MissingTarget)
        ));
    }

    #[test]
    fn test_target_is_encoded_once() {
        let reference = Tensor::new(&[1f32, 2.0], &Device::Cpu).unwrap();
        let rewarder = Rewarder::new(Box::new(TargetSum))
            .with_target(&reference)
            .unwrap();
        assert_eq!(rewarder.score(&images(2), "x").unwrap(), vec![6.0, 6.0]);
    }

    #[test]
    fn test_target_rejected_for_prompt_scorer() {
        let reference = Tensor::new(&[1f32], &Device::Cpu).unwrap();
        assert!(Rewarder::new(Box::new(PromptLength))
            .with_target(&reference)
            .is_err());
    }
}
