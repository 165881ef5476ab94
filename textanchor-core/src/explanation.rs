//! # Anchor Explanations
//!
//! An [`Explanation`] is the immutable record returned by
//! [`crate::AnchorText::explain`]. It pairs the explanation data (the anchor
//! words, their precision and coverage, and the raw search output) with
//! [`ExplanationMeta`], which records how the explainer was configured and
//! which parameters the call used.
//!
//! Every value is owned: mutating the options or parameters after a call
//! never changes an explanation already returned.

use crate::config::ExplainParams;
use crate::perturb::AnchorFeatures;
use crate::search::{SearchResult, StepExamples};
use crate::strategy::{OptionMap, SamplingStrategy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Parameters recorded in the explanation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationParams {
    pub seed: u64,
    pub sampling_strategy: SamplingStrategy,
    /// Strategy defaults overlaid with every caller option, recognized or not.
    pub options: OptionMap,
    /// Parameters of the `explain` call that produced the explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explain: Option<ExplainParams>,
}

/// Describes the explainer that produced an explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Vec<String>,
    pub explanations: Vec<String>,
    pub params: ExplanationParams,
    pub version: String,
    pub explanation_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl ExplanationMeta {
    pub const NAME: &'static str = "AnchorText";

    pub fn new(params: ExplanationParams) -> Self {
        Self {
            name: Self::NAME.to_string(),
            kind: vec!["blackbox".to_string()],
            explanations: vec!["local".to_string()],
            params,
            version: env!("CARGO_PKG_VERSION").to_string(),
            explanation_id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

/// Search output extended with what the explainer knows about the instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    #[serde(flatten)]
    pub search: SearchResult,
    /// Anchor words in the order they were added.
    pub names: Vec<String>,
    pub positions: Vec<usize>,
    pub instance: String,
    pub instances: Vec<String>,
    pub prediction: Vec<i64>,
}

/// Explanation payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnchorData {
    pub anchor: Vec<String>,
    pub precision: f64,
    pub coverage: f64,
    pub raw: RawData,
}

impl AnchorData {
    /// Precision and coverage of the full anchor; an empty anchor applies to
    /// every sample and its precision is that of unconstrained sampling.
    pub fn from_search(
        instance: &str,
        prediction: i64,
        features: AnchorFeatures,
        search: SearchResult,
    ) -> Self {
        let precision = search.precision.last().copied().unwrap_or(search.all_precision);
        let coverage = search.coverage.last().copied().unwrap_or(1.0);
        Self {
            anchor: features.names.clone(),
            precision,
            coverage,
            raw: RawData {
                search,
                names: features.names,
                positions: features.positions,
                instance: instance.to_string(),
                instances: vec![instance.to_string()],
                prediction: vec![prediction],
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Explanation
// ---------------------------------------------------------------------------

/// Anchor explanation of one prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    meta: ExplanationMeta,
    data: AnchorData,
}

impl Explanation {
    pub fn new(meta: ExplanationMeta, data: AnchorData) -> Self {
        Self { meta, data }
    }

    pub fn meta(&self) -> &ExplanationMeta {
        &self.meta
    }

    pub fn data(&self) -> &AnchorData {
        &self.data
    }

    /// Anchor words.
    pub fn anchor(&self) -> &[String] {
        &self.data.anchor
    }

    pub fn precision(&self) -> f64 {
        self.data.precision
    }

    pub fn coverage(&self) -> f64 {
        self.data.coverage
    }

    /// Positions of the anchor words: character offsets, or head-token
    /// positions for the `language_model` strategy.
    pub fn positions(&self) -> &[usize] {
        &self.data.raw.positions
    }

    /// Examples recorded for each step of the anchor.
    pub fn examples(&self) -> &[StepExamples] {
        &self.data.raw.search.examples
    }

    /// Whether the anchor satisfies the precision threshold.
    pub fn success(&self) -> bool {
        self.data.raw.search.success
    }

    pub fn instance(&self) -> &str {
        &self.data.raw.instance
    }

    /// Predicted class of the instance.
    pub fn prediction(&self) -> i64 {
        self.data.raw.prediction.first().copied().unwrap_or_default()
    }

    pub fn raw(&self) -> &RawData {
        &self.data.raw
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
