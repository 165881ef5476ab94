//! Configuration types for textanchor.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> explicit config file -> environment -> overrides.

use crate::error::{AnchorError, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnchorConfig {
    /// Explainer construction settings.
    #[serde(default)]
    pub explainer: ExplainerSettings,
    /// Parameters of each `explain` call.
    #[serde(default)]
    pub explain: ExplainParams,
    /// Classifier used by the command-line front end.
    #[serde(default)]
    pub classifier: ClassifierSettings,
}

/// Settings used when constructing an [`crate::AnchorText`] explainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainerSettings {
    /// Sampling strategy: `unknown`, `similarity` or `language_model`.
    #[serde(default = "default_strategy")]
    pub sampling_strategy: String,
    /// Seed shared by every random stream of the explainer.
    #[serde(default)]
    pub seed: u64,
    /// Embedding lexicon file (`word logprob v1 v2 ...` per line).
    #[serde(default)]
    pub lexicon_path: Option<PathBuf>,
    /// Strategy-specific perturbation options.
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl Default for ExplainerSettings {
    fn default() -> Self {
        Self {
            sampling_strategy: default_strategy(),
            seed: 0,
            lexicon_path: None,
            options: serde_json::Map::new(),
        }
    }
}

fn default_strategy() -> String {
    "unknown".to_string()
}

/// Parameters of a single anchor search.
///
/// The explanation keeps its own copy of these values, so mutating a params
/// value after `explain` returns never changes a returned explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainParams {
    /// Minimum anchor precision.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Significance level; `1 - delta` is the confidence of the precision bound.
    #[serde(default = "default_delta")]
    pub delta: f64,
    /// Bandit tolerance used when selecting the beam.
    #[serde(default = "default_tau")]
    pub tau: f64,
    /// Number of samples drawn per bandit pull.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Size of the pool used to estimate coverage.
    #[serde(default = "default_coverage_samples")]
    pub coverage_samples: usize,
    /// Number of candidate anchors kept per anchor size.
    #[serde(default = "default_beam_size")]
    pub beam_size: usize,
    /// Return the first anchor satisfying the precision constraint.
    #[serde(default = "default_true")]
    pub stop_on_first: bool,
    /// Upper bound on the number of words in an anchor.
    #[serde(default)]
    pub max_anchor_size: Option<usize>,
    /// Samples drawn for the empty anchor before the search starts.
    #[serde(default = "default_min_samples_start")]
    pub min_samples_start: usize,
    /// Covered examples kept per anchor and per label.
    #[serde(default = "default_n_covered_ex")]
    pub n_covered_ex: usize,
    /// Number of `batch_size` batches preallocated in the binary sample cache.
    #[serde(default = "default_binary_cache_size")]
    pub binary_cache_size: usize,
    /// Free-row margin that triggers growth of the sample cache.
    #[serde(default = "default_cache_margin")]
    pub cache_margin: usize,
    /// Tolerance used when deciding whether an anchor meets `threshold`.
    #[serde(default = "default_epsilon_stop")]
    pub epsilon_stop: f64,
    /// Log search progress at info level.
    #[serde(default)]
    pub verbose: bool,
    /// Log every `verbose_every` bandit iterations.
    #[serde(default = "default_verbose_every")]
    pub verbose_every: usize,
}

impl Default for ExplainParams {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            delta: default_delta(),
            tau: default_tau(),
            batch_size: default_batch_size(),
            coverage_samples: default_coverage_samples(),
            beam_size: default_beam_size(),
            stop_on_first: true,
            max_anchor_size: None,
            min_samples_start: default_min_samples_start(),
            n_covered_ex: default_n_covered_ex(),
            binary_cache_size: default_binary_cache_size(),
            cache_margin: default_cache_margin(),
            epsilon_stop: default_epsilon_stop(),
            verbose: false,
            verbose_every: default_verbose_every(),
        }
    }
}

impl ExplainParams {
    /// Reject values the search cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("threshold", self.threshold),
            ("delta", self.delta),
            ("tau", self.tau),
            ("epsilon_stop", self.epsilon_stop),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(AnchorError::invalid_parameter(
                    name,
                    format!("must lie in (0, 1], got {value}"),
                ));
            }
        }
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("coverage_samples", self.coverage_samples),
            ("beam_size", self.beam_size),
            ("min_samples_start", self.min_samples_start),
            ("binary_cache_size", self.binary_cache_size),
            ("verbose_every", self.verbose_every),
        ] {
            if value == 0 {
                return Err(AnchorError::invalid_parameter(name, "must be at least 1"));
            }
        }
        Ok(())
    }
}

fn default_threshold() -> f64 {
    0.95
}

fn default_delta() -> f64 {
    0.1
}

fn default_tau() -> f64 {
    0.15
}

fn default_batch_size() -> usize {
    100
}

fn default_coverage_samples() -> usize {
    10_000
}

fn default_beam_size() -> usize {
    1
}

fn default_min_samples_start() -> usize {
    100
}

fn default_n_covered_ex() -> usize {
    10
}

fn default_binary_cache_size() -> usize {
    10_000
}

fn default_cache_margin() -> usize {
    1_000
}

fn default_epsilon_stop() -> f64 {
    0.05
}

fn default_verbose_every() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// Classifier backing the command-line front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSettings {
    /// External command receiving a JSON array of texts on stdin and printing
    /// a JSON array of labels or score rows on stdout.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Keywords that switch the built-in lexicon classifier to the positive class.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Class emitted when a keyword is present.
    #[serde(default = "default_positive_class")]
    pub positive_class: i64,
    /// Class emitted otherwise.
    #[serde(default)]
    pub negative_class: i64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            command: None,
            keywords: Vec::new(),
            positive_class: default_positive_class(),
            negative_class: 0,
        }
    }
}

fn default_positive_class() -> i64 {
    1
}

/// Load configuration from all layers.
///
/// `workspace` contributes `<workspace>/.textanchor/config.toml`, `config_file`
/// is an explicitly requested file, and environment variables use the
/// `TEXTANCHOR_` prefix with `__` as the section separator
/// (`TEXTANCHOR_EXPLAIN__THRESHOLD=0.9`).
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: Option<&AnchorConfig>,
) -> std::result::Result<AnchorConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(AnchorConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "textanchor", "textanchor") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".textanchor").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("TEXTANCHOR_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}
