//! # Anchor Text Explainer
//!
//! [`AnchorText`] explains a single prediction of a black-box text classifier
//! with an anchor: a small set of words that, held fixed while the rest of
//! the text is perturbed, keeps the prediction unchanged with high
//! probability.
//!
//! ```no_run
//! use std::sync::Arc;
//! use textanchor_core::{AnchorText, BoxError, ExplainParams, PredictorOutput};
//!
//! let classifier = |texts: &[String]| -> Result<PredictorOutput, BoxError> {
//!     Ok(PredictorOutput::Labels(
//!         texts.iter().map(|t| i64::from(t.contains("good"))).collect(),
//!     ))
//! };
//! let mut explainer = AnchorText::builder(Arc::new(classifier))
//!     .sampling_strategy("unknown")
//!     .seed(0)
//!     .build()?;
//! let explanation = explainer.explain("this movie is good", &ExplainParams::default())?;
//! println!("{:?} {}", explanation.anchor(), explanation.precision());
//! # Ok::<(), textanchor_core::AnchorError>(())
//! ```

use crate::bridge::{RequestContext, SamplerBridge};
use crate::config::{ExplainParams, ExplainerSettings};
use crate::error::Result;
use crate::explanation::{AnchorData, Explanation, ExplanationMeta, ExplanationParams};
use crate::lm::LanguageModel;
use crate::nlp::{EmbeddingLexicon, NlpModel};
use crate::perturb::Perturbation;
use crate::predictor::{PredictorAdapter, TextClassifier};
use crate::search::{AnchorBeam, BeamParams};
use crate::strategy::{OptionMap, SamplingStrategy, validate_options};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use tracing::{debug, info};

/// Anchor explainer for text classifiers.
pub struct AnchorText {
    predictor: PredictorAdapter,
    perturbation: Perturbation,
    seed: u64,
    all_opts: OptionMap,
    rng: StdRng,
}

impl std::fmt::Debug for AnchorText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnchorText")
            .field("strategy", &self.perturbation.strategy())
            .field("seed", &self.seed)
            .field("predictor", &self.predictor)
            .finish_non_exhaustive()
    }
}

impl AnchorText {
    pub fn builder(classifier: Arc<dyn TextClassifier>) -> AnchorTextBuilder {
        AnchorTextBuilder::new(classifier)
    }

    pub fn strategy(&self) -> SamplingStrategy {
        self.perturbation.strategy()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Strategy defaults overlaid with every caller option, as recorded in metadata.
    pub fn options(&self) -> &OptionMap {
        &self.all_opts
    }

    pub fn perturbation(&self) -> &Perturbation {
        &self.perturbation
    }

    pub fn predictor(&self) -> &PredictorAdapter {
        &self.predictor
    }

    /// Replace the classifier, probing its output shape again.
    pub fn reset_predictor(&mut self, classifier: Arc<dyn TextClassifier>) -> Result<()> {
        self.predictor = PredictorAdapter::new(classifier)?;
        Ok(())
    }

    /// Explain the prediction of the classifier on `text`.
    pub fn explain(&mut self, text: &str, params: &ExplainParams) -> Result<Explanation> {
        params.validate()?;

        self.perturbation.bind(text);
        let instance_label = self.predictor.predict(&[text.to_string()])?[0];
        let ctx = RequestContext {
            instance_label,
            n_covered_ex: params.n_covered_ex,
        };
        debug!(
            strategy = %self.perturbation.strategy(),
            n_features = self.perturbation.num_features(),
            instance_label,
            "Starting anchor search"
        );

        let bridge = SamplerBridge::new(&mut self.perturbation, &self.predictor, &mut self.rng, ctx);
        let mut beam = AnchorBeam::new(vec![bridge], params.binary_cache_size, params.cache_margin)?;
        let result = beam.anchor_beam(&beam_params(params))?;
        drop(beam);

        let features = self.perturbation.feature_names(&result.feature);
        info!(
            anchor = ?features.names,
            success = result.success,
            num_preds = result.num_preds,
            "Anchor search finished"
        );

        let meta = ExplanationMeta::new(ExplanationParams {
            seed: self.seed,
            sampling_strategy: self.perturbation.strategy(),
            options: self.all_opts.clone(),
            explain: Some(params.clone()),
        });
        let data = AnchorData::from_search(text, instance_label, features, result);
        Ok(Explanation::new(meta, data))
    }
}

fn beam_params(params: &ExplainParams) -> BeamParams {
    BeamParams {
        delta: params.delta,
        epsilon: params.tau,
        batch_size: params.batch_size,
        desired_confidence: params.threshold,
        max_anchor_size: params.max_anchor_size,
        min_samples_start: params.min_samples_start,
        beam_size: params.beam_size,
        coverage_samples: params.coverage_samples,
        stop_on_first: params.stop_on_first,
        epsilon_stop: params.epsilon_stop,
        verbose: params.verbose,
        verbose_every: params.verbose_every,
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Fluent builder for [`AnchorText`].
pub struct AnchorTextBuilder {
    classifier: Arc<dyn TextClassifier>,
    sampling_strategy: String,
    nlp: Option<Arc<dyn NlpModel>>,
    language_model: Option<Arc<dyn LanguageModel>>,
    seed: u64,
    options: OptionMap,
}

impl AnchorTextBuilder {
    pub fn new(classifier: Arc<dyn TextClassifier>) -> Self {
        Self {
            classifier,
            sampling_strategy: SamplingStrategy::Unknown.as_str().to_string(),
            nlp: None,
            language_model: None,
            seed: 0,
            options: OptionMap::new(),
        }
    }

    /// Strategy name; unrecognized names fall back to `unknown`.
    pub fn sampling_strategy(mut self, name: impl Into<String>) -> Self {
        self.sampling_strategy = name.into();
        self
    }

    pub fn nlp(mut self, nlp: Arc<dyn NlpModel>) -> Self {
        self.nlp = Some(nlp);
        self
    }

    pub fn language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.language_model = Some(model);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Replace all perturbation options.
    pub fn options(mut self, options: OptionMap) -> Self {
        self.options = options;
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Apply configured settings, loading the embedding lexicon when a path is set.
    pub fn settings(mut self, settings: &ExplainerSettings) -> Result<Self> {
        self.sampling_strategy = settings.sampling_strategy.clone();
        self.seed = settings.seed;
        self.options = settings.options.clone();
        if let Some(path) = &settings.lexicon_path {
            let lexicon = EmbeddingLexicon::from_file(path)?;
            debug!(path = %path.display(), words = lexicon.len(), "Loaded embedding lexicon");
            self.nlp = Some(Arc::new(lexicon));
        }
        Ok(self)
    }

    pub fn build(self) -> Result<AnchorText> {
        let strategy = SamplingStrategy::resolve(&self.sampling_strategy);
        let validated = validate_options(strategy, &self.options)?;
        let mut perturbation =
            Perturbation::new(validated.perturb_opts, self.nlp, self.language_model)?;
        let predictor = PredictorAdapter::new(self.classifier)?;
        perturbation.seed(self.seed);

        Ok(AnchorText {
            predictor,
            perturbation,
            seed: self.seed,
            all_opts: validated.all_opts,
            rng: StdRng::seed_from_u64(self.seed),
        })
    }
}
