//! Sampling strategy resolution and perturbation option validation.
//!
//! A strategy name resolves to one of three perturbation engines. Caller
//! options are overlaid on the strategy defaults: recognized keys are
//! type-checked into the strategy's option struct, unrecognized keys are
//! reported with a warning and only kept in the audit record.

use crate::error::{AnchorError, Result};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Options map as supplied by callers and recorded in metadata.
pub type OptionMap = serde_json::Map<String, serde_json::Value>;

/// ASCII punctuation, never masked by the language model sampler by default.
pub const DEFAULT_PUNCTUATION: &str = r##"!"#$%&'()*+,-./:;<=>?@[\]^_`{|}~"##;

/// Perturbation distribution used to generate samples around an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Replace words with `UNK`.
    Unknown,
    /// Replace words with embedding-space neighbours.
    Similarity,
    /// Replace words with masked language model predictions.
    LanguageModel,
}

impl SamplingStrategy {
    pub const ALL: [SamplingStrategy; 3] = [Self::Unknown, Self::Similarity, Self::LanguageModel];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Similarity => "similarity",
            Self::LanguageModel => "language_model",
        }
    }

    /// Resolve a user-supplied name, falling back to [`SamplingStrategy::Unknown`]
    /// with a warning when the name is not recognized.
    pub fn resolve(name: &str) -> Self {
        match name.parse() {
            Ok(strategy) => strategy,
            Err(_) => {
                warn!(
                    requested = name,
                    fallback = Self::Unknown.as_str(),
                    "Sampling strategy {name:?} is not valid, using the default {:?}",
                    Self::Unknown.as_str()
                );
                Self::Unknown
            }
        }
    }

    /// Default perturbation options, as an option map.
    pub fn default_options(&self) -> OptionMap {
        let value = match self {
            Self::Unknown => serde_json::to_value(UnknownOptions::default()),
            Self::Similarity => serde_json::to_value(SimilarityOptions::default()),
            Self::LanguageModel => serde_json::to_value(LanguageModelOptions::default()),
        };
        match value {
            Ok(serde_json::Value::Object(map)) => map,
            _ => OptionMap::new(),
        }
    }
}

impl fmt::Display for SamplingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplingStrategy {
    type Err = AnchorError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| AnchorError::configuration(format!("unknown sampling strategy {s:?}")))
    }
}

// ---------------------------------------------------------------------------
// Typed option sets
// ---------------------------------------------------------------------------

/// Options of the `unknown` strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnknownOptions {
    /// Probability of a word being replaced by `UNK`.
    pub sample_proba: f64,
}

impl Default for UnknownOptions {
    fn default() -> Self {
        Self { sample_proba: 0.5 }
    }
}

/// Options of the `similarity` strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityOptions {
    /// Probability of a word being replaced.
    pub sample_proba: f64,
    /// Number of nearest neighbours considered per word.
    pub top_n: usize,
    /// Softmax temperature used when `use_proba` is set.
    pub temperature: f64,
    /// Sample neighbours proportionally to their similarity.
    pub use_proba: bool,
}

impl Default for SimilarityOptions {
    fn default() -> Self {
        Self {
            sample_proba: 0.5,
            top_n: 100,
            temperature: 1.0,
            use_proba: false,
        }
    }
}

/// How masked positions are filled by the language model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filling {
    /// One forward pass per template; masks are filled independently.
    Parallel,
    /// One mask filled per forward pass, left to right.
    Autoregressive,
}

/// Options of the `language_model` strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageModelOptions {
    pub filling: Filling,
    /// Probability of a word being masked.
    pub sample_proba: f64,
    /// Number of candidate tokens considered per mask.
    pub top_n: usize,
    pub temperature: f64,
    /// Sample candidates according to the predicted distribution instead of uniformly.
    pub use_proba: bool,
    /// Number of mask templates as a fraction of the requested samples.
    pub frac_mask_templates: f64,
    /// Batch size of language model forward passes.
    pub batch_size_lm: usize,
    /// Characters treated as punctuation; punctuation is never masked.
    pub punctuation: String,
    /// Words that are never masked.
    pub stopwords: Vec<String>,
    /// Allow punctuation tokens as infill candidates.
    pub sample_punctuation: bool,
}

impl Default for LanguageModelOptions {
    fn default() -> Self {
        Self {
            filling: Filling::Parallel,
            sample_proba: 0.5,
            top_n: 100,
            temperature: 1.0,
            use_proba: false,
            frac_mask_templates: 0.1,
            batch_size_lm: 32,
            punctuation: DEFAULT_PUNCTUATION.to_string(),
            stopwords: Vec::new(),
            sample_punctuation: false,
        }
    }
}

/// Effective, type-checked perturbation options of the active strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PerturbOptions {
    Unknown(UnknownOptions),
    Similarity(SimilarityOptions),
    LanguageModel(LanguageModelOptions),
}

impl PerturbOptions {
    pub fn strategy(&self) -> SamplingStrategy {
        match self {
            Self::Unknown(_) => SamplingStrategy::Unknown,
            Self::Similarity(_) => SamplingStrategy::Similarity,
            Self::LanguageModel(_) => SamplingStrategy::LanguageModel,
        }
    }

    /// Option map of exactly the recognized keys.
    pub fn to_map(&self) -> OptionMap {
        let value = match self {
            Self::Unknown(opts) => serde_json::to_value(opts),
            Self::Similarity(opts) => serde_json::to_value(opts),
            Self::LanguageModel(opts) => serde_json::to_value(opts),
        };
        match value {
            Ok(serde_json::Value::Object(map)) => map,
            _ => OptionMap::new(),
        }
    }

    fn check_ranges(&self) -> Result<()> {
        match self {
            Self::Unknown(opts) => check_proba(opts.sample_proba),
            Self::Similarity(opts) => {
                check_proba(opts.sample_proba)?;
                check_top_n(opts.top_n)?;
                check_temperature(opts.temperature)
            }
            Self::LanguageModel(opts) => {
                check_proba(opts.sample_proba)?;
                check_top_n(opts.top_n)?;
                check_temperature(opts.temperature)?;
                if !(opts.frac_mask_templates > 0.0 && opts.frac_mask_templates <= 1.0) {
                    return Err(AnchorError::invalid_option(
                        "frac_mask_templates",
                        format!("must lie in (0, 1], got {}", opts.frac_mask_templates),
                    ));
                }
                if opts.batch_size_lm == 0 {
                    return Err(AnchorError::invalid_option(
                        "batch_size_lm",
                        "must be at least 1",
                    ));
                }
                Ok(())
            }
        }
    }
}

fn check_proba(value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AnchorError::invalid_option(
            "sample_proba",
            format!("must lie in [0, 1], got {value}"),
        ))
    }
}

fn check_top_n(value: usize) -> Result<()> {
    if value == 0 {
        return Err(AnchorError::invalid_option("top_n", "must be at least 1"));
    }
    Ok(())
}

fn check_temperature(value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(AnchorError::invalid_option(
            "temperature",
            format!("must be a positive number, got {value}"),
        ))
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Result of validating caller options against a strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOptions {
    /// Options handed to the perturbation engine.
    pub perturb_opts: PerturbOptions,
    /// Defaults overlaid with every caller key, recognized or not. Audit only.
    pub all_opts: OptionMap,
    /// Caller keys that the strategy does not recognize, sorted.
    pub unknown_keys: Vec<String>,
}

/// Overlay `provided` on the defaults of `strategy`.
pub fn validate_options(strategy: SamplingStrategy, provided: &OptionMap) -> Result<ValidatedOptions> {
    let defaults = strategy.default_options();
    let allowed: BTreeSet<&str> = defaults.keys().map(String::as_str).collect();

    let unknown_keys: Vec<String> = provided
        .keys()
        .filter(|key| !allowed.contains(key.as_str()))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if !unknown_keys.is_empty() {
        warn!(
            strategy = strategy.as_str(),
            keys = ?unknown_keys,
            "The following keys are incorrect: {}",
            unknown_keys.join(", ")
        );
    }

    let mut effective = defaults.clone();
    for (key, value) in provided {
        if allowed.contains(key.as_str()) {
            effective.insert(key.clone(), value.clone());
        }
    }

    let perturb_opts = match strategy {
        SamplingStrategy::Unknown => {
            PerturbOptions::Unknown(typed_options(&defaults, &effective, provided)?)
        }
        SamplingStrategy::Similarity => {
            PerturbOptions::Similarity(typed_options(&defaults, &effective, provided)?)
        }
        SamplingStrategy::LanguageModel => {
            PerturbOptions::LanguageModel(typed_options(&defaults, &effective, provided)?)
        }
    };
    perturb_opts.check_ranges()?;

    let mut all_opts = defaults;
    for (key, value) in provided {
        all_opts.insert(key.clone(), value.clone());
    }

    Ok(ValidatedOptions {
        perturb_opts,
        all_opts,
        unknown_keys,
    })
}

/// Deserialize `effective`; on failure, blame the first caller key that does
/// not type-check on its own.
fn typed_options<T: DeserializeOwned>(
    defaults: &OptionMap,
    effective: &OptionMap,
    provided: &OptionMap,
) -> Result<T> {
    match serde_json::from_value(serde_json::Value::Object(effective.clone())) {
        Ok(options) => Ok(options),
        Err(err) => {
            let mut keys: Vec<&String> = provided
                .keys()
                .filter(|key| defaults.contains_key(key.as_str()))
                .collect();
            keys.sort();
            for key in keys {
                let mut single = defaults.clone();
                single.insert(key.clone(), provided[key.as_str()].clone());
                if let Err(key_err) = serde_json::from_value::<T>(serde_json::Value::Object(single))
                {
                    return Err(AnchorError::invalid_option(key.clone(), key_err.to_string()));
                }
            }
            Err(AnchorError::invalid_option("<options>", err.to_string()))
        }
    }
}
