//! Perturbation engines.
//!
//! A [`Perturbation`] is created once per explainer, re-bound to each text
//! being explained, and asked for samples around candidate anchors. Feature
//! `i` always refers to the same word of the bound text.

pub mod language_model;
pub mod matrix;
pub mod similarity;
pub mod unknown;

pub use language_model::LanguageModelSampler;
pub use matrix::BinaryMatrix;
pub use similarity::SimilaritySampler;
pub use unknown::UnknownSampler;

use crate::error::{AnchorError, Result};
use crate::lm::LanguageModel;
use crate::nlp::NlpModel;
use crate::strategy::{PerturbOptions, SamplingStrategy};
use rand::rngs::StdRng;
use std::sync::Arc;

/// Per-column flag: whether the column is part of `anchor`.
pub(crate) fn anchor_flags(anchor: &[usize], n: usize) -> Vec<bool> {
    let mut flags = vec![false; n];
    for &i in anchor {
        if i < n {
            flags[i] = true;
        }
    }
    flags
}

pub(crate) fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

/// Words and positions of a set of features.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnchorFeatures {
    pub names: Vec<String>,
    pub positions: Vec<usize>,
}

/// The perturbation engine of one sampling strategy.
pub enum Perturbation {
    Unknown(UnknownSampler),
    Similarity(SimilaritySampler),
    LanguageModel(LanguageModelSampler),
}

impl Perturbation {
    /// Build the engine for `opts`. Strategies that need a model fail when it
    /// is not supplied.
    pub fn new(
        opts: PerturbOptions,
        nlp: Option<Arc<dyn NlpModel>>,
        language_model: Option<Arc<dyn LanguageModel>>,
    ) -> Result<Self> {
        match opts {
            PerturbOptions::Unknown(opts) => Ok(Self::Unknown(UnknownSampler::new(nlp, opts))),
            PerturbOptions::Similarity(opts) => {
                let nlp = nlp.ok_or_else(|| {
                    AnchorError::configuration(
                        "the similarity strategy requires an NLP model with word vectors",
                    )
                })?;
                Ok(Self::Similarity(SimilaritySampler::new(nlp, opts)))
            }
            PerturbOptions::LanguageModel(opts) => {
                let model = language_model.ok_or_else(|| {
                    AnchorError::configuration(
                        "the language_model strategy requires a language model",
                    )
                })?;
                Ok(Self::LanguageModel(LanguageModelSampler::new(model, opts)))
            }
        }
    }

    pub fn strategy(&self) -> SamplingStrategy {
        match self {
            Self::Unknown(_) => SamplingStrategy::Unknown,
            Self::Similarity(_) => SamplingStrategy::Similarity,
            Self::LanguageModel(_) => SamplingStrategy::LanguageModel,
        }
    }

    /// Effective options of the engine.
    pub fn options(&self) -> PerturbOptions {
        match self {
            Self::Unknown(s) => PerturbOptions::Unknown(s.options().clone()),
            Self::Similarity(s) => PerturbOptions::Similarity(s.options().clone()),
            Self::LanguageModel(s) => PerturbOptions::LanguageModel(s.options().clone()),
        }
    }

    /// Bind the text to explain. Replaces any previously bound text.
    pub fn bind(&mut self, text: &str) {
        match self {
            Self::Unknown(s) => s.bind(text),
            Self::Similarity(s) => s.bind(text),
            Self::LanguageModel(s) => s.bind(text),
        }
    }

    pub fn num_features(&self) -> usize {
        match self {
            Self::Unknown(s) => s.num_features(),
            Self::Similarity(s) => s.num_features(),
            Self::LanguageModel(s) => s.num_features(),
        }
    }

    /// `num_samples` perturbed texts with the `anchor` features held fixed,
    /// and the matching mask (1 = unchanged).
    pub fn generate(
        &mut self,
        anchor: &[usize],
        num_samples: usize,
        rng: &mut StdRng,
    ) -> Result<(Vec<String>, BinaryMatrix)> {
        match self {
            Self::Unknown(s) => Ok(s.generate(anchor, num_samples, rng)),
            Self::Similarity(s) => Ok(s.generate(anchor, num_samples, rng)),
            Self::LanguageModel(s) => s.generate(anchor, num_samples, rng),
        }
    }

    /// Reseed engine-owned randomness. Only the language model sampler has any.
    pub fn seed(&mut self, seed: u64) {
        if let Self::LanguageModel(s) = self {
            s.seed(seed);
        }
    }

    /// Words and positions of `features`.
    ///
    /// Positions are character offsets for the token based strategies and
    /// head-token positions for the language model strategy.
    pub fn feature_names(&self, features: &[usize]) -> AnchorFeatures {
        match self {
            Self::Unknown(s) => lookup(features, s.words(), s.positions()),
            Self::Similarity(s) => lookup(features, s.words(), s.positions()),
            Self::LanguageModel(s) => {
                let model = s.model();
                let punctuation = s.options().punctuation.as_str();
                let mut out = AnchorFeatures::default();
                for &f in features {
                    if let Some(&pos) = s.ids_mapping().get(f) {
                        out.names.push(model.select_word(s.head_tokens(), pos, punctuation));
                        out.positions.push(pos);
                    }
                }
                out
            }
        }
    }

    pub fn head_tokens(&self) -> Option<&[String]> {
        match self {
            Self::LanguageModel(s) => Some(s.head_tokens()),
            _ => None,
        }
    }

    pub fn ids_mapping(&self) -> Option<&[usize]> {
        match self {
            Self::LanguageModel(s) => Some(s.ids_mapping()),
            _ => None,
        }
    }
}

fn lookup(features: &[usize], words: &[String], positions: &[usize]) -> AnchorFeatures {
    let mut out = AnchorFeatures::default();
    for &f in features {
        if let (Some(word), Some(&pos)) = (words.get(f), positions.get(f)) {
            out.names.push(word.clone());
            out.positions.push(pos);
        }
    }
    out
}

impl std::fmt::Debug for Perturbation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Perturbation")
            .field("strategy", &self.strategy())
            .field("num_features", &self.num_features())
            .finish()
    }
}
