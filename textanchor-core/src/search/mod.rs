//! KL-LUCB beam search over anchors.
//!
//! The engine knows nothing about text: it asks an [`AnchorSampler`] for
//! binary masks and agreement labels of samples drawn with a candidate
//! anchor held fixed, and grows anchors one feature at a time until one is
//! precise enough.

pub mod bounds;
mod state;

use crate::error::{AnchorError, Result};
use crate::perturb::BinaryMatrix;
use bounds::{compute_beta, dlow_bernoulli, dup_bernoulli};
use serde::{Deserialize, Serialize};
use state::SearchState;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Output of one sampler call.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBatch {
    Labeled {
        /// Samples predicted as the instance's class, earliest first.
        covered_true: Vec<String>,
        /// Samples predicted as another class, earliest first.
        covered_false: Vec<String>,
        labels: Vec<bool>,
        mask: BinaryMatrix,
        /// Always `-1.0`; coverage is computed by the search.
        coverage: f64,
        anchor_idx: usize,
    },
    /// Only the mask, when labels were not requested.
    Mask(BinaryMatrix),
}

impl SampleBatch {
    pub fn mask(&self) -> &BinaryMatrix {
        match self {
            Self::Labeled { mask, .. } => mask,
            Self::Mask(mask) => mask,
        }
    }
}

/// Source of perturbed samples for the search.
pub trait AnchorSampler {
    /// Draw `num_samples` samples with the features of `anchor` held fixed.
    fn sample(
        &mut self,
        anchor_idx: usize,
        anchor: &[usize],
        num_samples: usize,
        compute_labels: bool,
    ) -> Result<SampleBatch>;
}

impl<S: AnchorSampler + ?Sized> AnchorSampler for &mut S {
    fn sample(
        &mut self,
        anchor_idx: usize,
        anchor: &[usize],
        num_samples: usize,
        compute_labels: bool,
    ) -> Result<SampleBatch> {
        (**self).sample(anchor_idx, anchor, num_samples, compute_labels)
    }
}

/// Parameters of one beam search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamParams {
    pub delta: f64,
    pub epsilon: f64,
    pub batch_size: usize,
    pub desired_confidence: f64,
    pub max_anchor_size: Option<usize>,
    pub min_samples_start: usize,
    pub beam_size: usize,
    pub coverage_samples: usize,
    pub stop_on_first: bool,
    pub epsilon_stop: f64,
    pub verbose: bool,
    pub verbose_every: usize,
}

impl Default for BeamParams {
    fn default() -> Self {
        Self {
            delta: 0.05,
            epsilon: 0.1,
            batch_size: 10,
            desired_confidence: 1.0,
            max_anchor_size: None,
            min_samples_start: 1,
            beam_size: 1,
            coverage_samples: 10_000,
            stop_on_first: false,
            epsilon_stop: 0.05,
            verbose: false,
            verbose_every: 1,
        }
    }
}

/// Examples recorded for one step of the anchor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepExamples {
    pub covered_true: Vec<String>,
    pub covered_false: Vec<String>,
    pub uncovered_true: Vec<String>,
    pub uncovered_false: Vec<String>,
}

/// Result of a beam search. The per-step vectors are indexed by the
/// position at which a feature was added to the anchor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub feature: Vec<usize>,
    pub mean: Vec<f64>,
    pub precision: Vec<f64>,
    pub coverage: Vec<f64>,
    pub examples: Vec<StepExamples>,
    pub all_precision: f64,
    pub num_preds: usize,
    pub success: bool,
}

/// Beam search engine.
pub struct AnchorBeam<S> {
    samplers: Vec<S>,
    sample_cache_size: usize,
    cache_margin: usize,
}

impl<S: AnchorSampler> AnchorBeam<S> {
    pub fn new(samplers: Vec<S>, sample_cache_size: usize, cache_margin: usize) -> Result<Self> {
        if samplers.is_empty() {
            return Err(AnchorError::configuration(
                "anchor search needs at least one sampler",
            ));
        }
        Ok(Self {
            samplers,
            sample_cache_size,
            cache_margin,
        })
    }

    /// Draw `batch_size` labeled samples for each anchor and record them.
    fn draw_samples(
        &mut self,
        state: &mut SearchState,
        anchors: &[&[usize]],
        batch_size: usize,
    ) -> Result<()> {
        let n_samplers = self.samplers.len();
        for (i, anchor) in anchors.iter().enumerate() {
            let batch = self.samplers[i % n_samplers].sample(i, anchor, batch_size, true)?;
            match batch {
                SampleBatch::Labeled {
                    covered_true,
                    covered_false,
                    labels,
                    mask,
                    ..
                } => {
                    if labels.len() != mask.rows() {
                        return Err(AnchorError::SamplerContract {
                            what: "labels",
                            expected: mask.rows(),
                            got: labels.len(),
                        });
                    }
                    if mask.cols() != state.n_features() {
                        return Err(AnchorError::SamplerContract {
                            what: "mask columns",
                            expected: state.n_features(),
                            got: mask.cols(),
                        });
                    }
                    state.update(anchor, &mask, &labels, covered_true, covered_false);
                }
                SampleBatch::Mask(_) => {
                    return Err(AnchorError::SamplerContract {
                        what: "labeled batches",
                        expected: 1,
                        got: 0,
                    });
                }
            }
        }
        Ok(())
    }

    /// Indices of the `top_n` anchors with the highest precision, found by
    /// KL-LUCB to within `epsilon`.
    #[allow(clippy::too_many_arguments)]
    fn kllucb(
        &mut self,
        state: &mut SearchState,
        anchors: &[Vec<usize>],
        epsilon: f64,
        delta: f64,
        batch_size: usize,
        top_n: usize,
        verbose: bool,
        verbose_every: usize,
    ) -> Result<Vec<usize>> {
        let unsampled: Vec<&[usize]> = anchors
            .iter()
            .filter(|a| state.n_samples(a) == 0)
            .map(Vec::as_slice)
            .collect();
        if !unsampled.is_empty() {
            self.draw_samples(state, &unsampled, 1)?;
        }
        if top_n == 0 {
            return Ok(Vec::new());
        }
        if anchors.len() <= top_n {
            return Ok((0..anchors.len()).collect());
        }

        let n_arms = anchors.len();
        let mut ub = vec![0.0; n_arms];
        let mut lb = vec![0.0; n_arms];
        let mut t = 1;
        let (mut ut, mut lt) =
            select_critical_arms(state, anchors, &mut ub, &mut lb, delta, top_n, t);
        let mut iteration = 0usize;
        while ub[ut] - lb[lt] > epsilon {
            iteration += 1;
            if verbose && iteration % verbose_every.max(1) == 0 {
                info!(
                    best = ?anchors[lt],
                    best_mean = state.mean(&anchors[lt]),
                    best_lb = lb[lt],
                    challenger = ?anchors[ut],
                    challenger_mean = state.mean(&anchors[ut]),
                    challenger_ub = ub[ut],
                    gap = ub[ut] - lb[lt],
                    "KL-LUCB iteration {iteration}"
                );
            }
            let pair = [anchors[ut].as_slice(), anchors[lt].as_slice()];
            self.draw_samples(state, &pair, batch_size)?;
            t += 1;
            (ut, lt) = select_critical_arms(state, anchors, &mut ub, &mut lb, delta, top_n, t);
        }
        let order = argsort_means(state, anchors);
        Ok(order[n_arms - top_n..].to_vec())
    }

    /// Run the beam search.
    pub fn anchor_beam(&mut self, params: &BeamParams) -> Result<SearchResult> {
        let conf = params.desired_confidence;
        if !(params.epsilon_stop > 0.0) {
            return Err(AnchorError::invalid_parameter(
                "epsilon_stop",
                format!("must be positive, got {}", params.epsilon_stop),
            ));
        }

        let coverage_pool = match self.samplers[0].sample(0, &[], params.coverage_samples, false)? {
            SampleBatch::Mask(mask) => mask,
            SampleBatch::Labeled { mask, .. } => mask,
        };
        let mut state = SearchState::new(
            coverage_pool,
            params.batch_size,
            self.sample_cache_size,
            self.cache_margin,
        );
        let n_features = state.n_features();

        let empty: &[usize] = &[];
        self.draw_samples(&mut state, &[empty], params.min_samples_start)?;
        let mean = state.mean(&[]);
        let n_start = state.n_samples(&[]).max(1);
        let beta = (1.0 / params.delta).ln();
        let lb = dlow_bernoulli(mean, beta / n_start as f64);
        if mean > conf && lb > conf - params.epsilon {
            debug!(mean, lb, "Empty anchor is precise enough");
            return Ok(SearchResult {
                all_precision: mean,
                num_preds: state.current_idx(),
                success: true,
                ..Default::default()
            });
        }

        let max_anchor_size = params
            .max_anchor_size
            .map_or(n_features, |m| m.min(n_features));
        let mut best_of_size: BTreeMap<usize, Vec<Vec<usize>>> = BTreeMap::new();
        best_of_size.insert(0, Vec::new());
        let mut best_coverage = -1.0;
        let mut best_anchor: Option<Vec<usize>> = None;
        let beta = (1.0
            / (params.delta
                / (1.0 + (params.beam_size as f64 - 1.0) * n_features as f64)))
            .ln();

        for current_size in 1..=max_anchor_size {
            let previous = best_of_size.get(&(current_size - 1)).cloned().unwrap_or_default();
            let candidates: Vec<Vec<usize>> = state
                .propose(&previous)
                .into_iter()
                .filter(|a| state.coverage(a) > best_coverage)
                .collect();
            if candidates.is_empty() {
                debug!(size = current_size, "No candidate improves coverage");
                break;
            }

            let top_n = params.beam_size.min(candidates.len());
            let chosen = self.kllucb(
                &mut state,
                &candidates,
                params.epsilon,
                params.delta,
                params.batch_size,
                top_n,
                params.verbose,
                params.verbose_every,
            )?;
            let beam: Vec<Vec<usize>> = chosen.iter().map(|&i| candidates[i].clone()).collect();

            loop {
                let to_sample: Vec<&[usize]> = beam
                    .iter()
                    .filter(|a| {
                        let (mean, lb, ub) = bounds_of(&state, a, beta);
                        (mean >= conf && lb < conf - params.epsilon_stop)
                            || (mean < conf && ub >= conf + params.epsilon_stop)
                    })
                    .map(Vec::as_slice)
                    .collect();
                if to_sample.is_empty() {
                    break;
                }
                self.draw_samples(&mut state, &to_sample, params.batch_size)?;
            }

            let mut stop = false;
            for anchor in &beam {
                let (mean, lb, ub) = bounds_of(&state, anchor, beta);
                let coverage = state.coverage(anchor);
                let message = format!("Best of size {current_size}");
                if params.verbose {
                    info!(anchor = ?anchor, mean, lb, ub, coverage, n = state.n_samples(anchor), "{message}");
                } else {
                    debug!(anchor = ?anchor, mean, lb, ub, coverage, n = state.n_samples(anchor), "{message}");
                }
                if mean >= conf && lb > conf - params.epsilon_stop && coverage > best_coverage {
                    best_coverage = coverage;
                    best_anchor = Some(anchor.clone());
                    if best_coverage == 1.0 || params.stop_on_first {
                        stop = true;
                    }
                }
            }
            best_of_size.insert(current_size, beam);
            if stop {
                break;
            }
        }

        let (best, success) = match best_anchor {
            Some(anchor) => (anchor, true),
            None => {
                warn!(
                    threshold = conf,
                    "Could not find an anchor satisfying the {conf} precision constraint. \
                     Now returning the best non-eligible result."
                );
                let all: Vec<Vec<usize>> = best_of_size.values().flatten().cloned().collect();
                if all.is_empty() {
                    (Vec::new(), false)
                } else {
                    let chosen = self.kllucb(
                        &mut state,
                        &all,
                        params.epsilon,
                        params.delta,
                        params.batch_size,
                        1,
                        params.verbose,
                        params.verbose_every,
                    )?;
                    (all[chosen[0]].clone(), false)
                }
            }
        };

        let mut result = state.anchor_metadata(&best, success);
        if best.is_empty() {
            result.all_precision = state.mean(&[]);
        }
        Ok(result)
    }
}

fn bounds_of(state: &SearchState, anchor: &[usize], beta: f64) -> (f64, f64, f64) {
    let mean = state.mean(anchor);
    let n = state.n_samples(anchor).max(1) as f64;
    (mean, dlow_bernoulli(mean, beta / n), dup_bernoulli(mean, beta / n))
}

/// Arm indices sorted by ascending mean; ties keep their order.
fn argsort_means(state: &SearchState, anchors: &[Vec<usize>]) -> Vec<usize> {
    let means: Vec<f64> = anchors.iter().map(|a| state.mean(a)).collect();
    let mut order: Vec<usize> = (0..anchors.len()).collect();
    order.sort_by(|&a, &b| means[a].total_cmp(&means[b]));
    order
}

/// The weakest arm of the current top set and the strongest challenger.
fn select_critical_arms(
    state: &SearchState,
    anchors: &[Vec<usize>],
    ub: &mut [f64],
    lb: &mut [f64],
    delta: f64,
    top_n: usize,
    t: usize,
) -> (usize, usize) {
    let order = argsort_means(state, anchors);
    let beta = compute_beta(anchors.len(), t, delta);
    let split = anchors.len() - top_n;
    let (not_j, j) = order.split_at(split);

    for &i in not_j {
        let n = state.n_samples(&anchors[i]).max(1) as f64;
        ub[i] = dup_bernoulli(state.mean(&anchors[i]), beta / n);
    }
    for &i in j {
        let n = state.n_samples(&anchors[i]).max(1) as f64;
        lb[i] = dlow_bernoulli(state.mean(&anchors[i]), beta / n);
    }

    let mut ut = not_j[0];
    for &i in not_j {
        if ub[i] > ub[ut] {
            ut = i;
        }
    }
    let mut lt = j[0];
    for &i in j {
        if lb[i] < lb[lt] {
            lt = i;
        }
    }
    (ut, lt)
}
