//! # textanchor-core: Anchor Explanations for Text Classifiers
//!
//! This crate explains single predictions of black-box text classifiers with
//! anchors: minimal sets of words that, when held fixed while the rest of the
//! text is perturbed, preserve the prediction with high statistical
//! confidence.
//!
//! ## Layers
//!
//! 1. **Predictor adapter**: normalizes classifier output to class indices
//! 2. **Strategy validation**: resolves the sampling strategy and its options
//! 3. **Perturbation engines**: `unknown`, `similarity` and `language_model`
//! 4. **Sampler bridge**: labels perturbed samples for the search
//! 5. **Beam search**: KL-LUCB search over candidate anchors
//! 6. **Explanations**: immutable records with metadata

// Foundation
pub mod config;
pub mod error;

// Models and sampling
pub mod lm;
pub mod nlp;
pub mod perturb;
pub mod predictor;
pub mod strategy;

// Search
pub mod bridge;
pub mod search;

// Explainer
pub mod explainer;
pub mod explanation;

// Re-exports
pub use config::{AnchorConfig, ClassifierSettings, ExplainParams, ExplainerSettings, load_config};
pub use error::{AnchorError, BoxError, Result};
pub use explainer::{AnchorText, AnchorTextBuilder};
pub use explanation::{AnchorData, Explanation, ExplanationMeta, ExplanationParams, RawData};
pub use lm::{Candidate, LanguageModel, MaskPredictions};
pub use nlp::{EmbeddingLexicon, Neighbor, NlpModel, RuleTokenizer, Token};
pub use perturb::{AnchorFeatures, BinaryMatrix, Perturbation};
pub use predictor::{OutputMode, PredictorAdapter, PredictorOutput, TextClassifier};
pub use search::{AnchorBeam, AnchorSampler, BeamParams, SampleBatch, SearchResult, StepExamples};
pub use strategy::{OptionMap, PerturbOptions, SamplingStrategy};
