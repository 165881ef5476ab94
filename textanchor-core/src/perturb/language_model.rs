//! `language_model` strategy: mask words and refill them with a masked
//! language model.
//!
//! Features are the head-word positions of the instance that may be
//! perturbed: word-initial tokens that are neither punctuation nor
//! stopwords. Masks are drawn per template and spread evenly over the
//! requested samples; each template costs one language model pass
//! (`parallel`) or one pass per mask (`autoregressive`).

use super::{BinaryMatrix, anchor_flags, softmax};
use crate::error::{AnchorError, Result};
use crate::lm::{Candidate, LanguageModel, MaskPredictions, word_end};
use crate::strategy::{Filling, LanguageModelOptions};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

/// Masked language model sampler.
pub struct LanguageModelSampler {
    model: Arc<dyn LanguageModel>,
    opts: LanguageModelOptions,
    rng: StdRng,
    head_tokens: Vec<String>,
    tail_tokens: Vec<String>,
    /// Head-token position of each feature.
    ids_sample: Vec<usize>,
    /// Token span covered by each feature's word.
    spans: Vec<Range<usize>>,
}

/// One masked token sequence and the positions of its masks.
#[derive(Debug, Clone)]
struct Template {
    tokens: Vec<String>,
    masks: Vec<usize>,
}

impl LanguageModelSampler {
    pub fn new(model: Arc<dyn LanguageModel>, opts: LanguageModelOptions) -> Self {
        Self {
            model,
            opts,
            rng: StdRng::seed_from_u64(0),
            head_tokens: Vec::new(),
            tail_tokens: Vec::new(),
            ids_sample: Vec::new(),
            spans: Vec::new(),
        }
    }

    pub fn options(&self) -> &LanguageModelOptions {
        &self.opts
    }

    pub fn model(&self) -> &Arc<dyn LanguageModel> {
        &self.model
    }

    /// Reseed the sampler's own random stream used to pick infill tokens.
    pub fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn bind(&mut self, text: &str) {
        let mut tokens = self.model.tokenize(text);
        let max_len = self.model.max_len();
        self.tail_tokens = if tokens.len() > max_len {
            tokens.split_off(max_len)
        } else {
            Vec::new()
        };
        self.head_tokens = tokens;

        let punctuation = self.opts.punctuation.as_str();
        self.ids_sample.clear();
        self.spans.clear();
        for i in 0..self.head_tokens.len() {
            let token = &self.head_tokens[i];
            if self.model.is_continuation(token)
                || self.model.is_punctuation(token, punctuation)
                || self
                    .model
                    .is_stop_word(&self.head_tokens, i, punctuation, &self.opts.stopwords)
            {
                continue;
            }
            let end = word_end(self.model.as_ref(), &self.head_tokens, i, punctuation);
            self.ids_sample.push(i);
            self.spans.push(i..end);
        }
        debug!(
            head_tokens = self.head_tokens.len(),
            tail_tokens = self.tail_tokens.len(),
            features = self.ids_sample.len(),
            "Bound language model sampler"
        );
    }

    pub fn head_tokens(&self) -> &[String] {
        &self.head_tokens
    }

    /// Head-token position of every feature, indexed by feature.
    pub fn ids_mapping(&self) -> &[usize] {
        &self.ids_sample
    }

    pub fn num_features(&self) -> usize {
        self.ids_sample.len()
    }

    fn n_templates(&self, num_samples: usize) -> usize {
        match self.opts.filling {
            Filling::Autoregressive => num_samples,
            Filling::Parallel if self.opts.sample_proba >= 1.0 => 1,
            Filling::Parallel => {
                ((num_samples as f64 * self.opts.frac_mask_templates).floor() as usize).max(1)
            }
        }
    }

    pub fn generate(
        &mut self,
        anchor: &[usize],
        num_samples: usize,
        rng: &mut StdRng,
    ) -> Result<(Vec<String>, BinaryMatrix)> {
        let n_features = self.num_features();
        if num_samples == 0 {
            return Ok((Vec::new(), BinaryMatrix::ones(0, n_features)));
        }

        let n_templates = self.n_templates(num_samples).min(num_samples);
        let fixed = anchor_flags(anchor, n_features);
        let mut template_masks = BinaryMatrix::ones(n_templates, n_features);
        for (col, is_fixed) in fixed.iter().enumerate() {
            if *is_fixed {
                continue;
            }
            for t in 0..n_templates {
                if rng.gen_bool(self.opts.sample_proba) {
                    template_masks.set(t, col, false);
                }
            }
        }

        // Row r of the output uses template r * n_templates / num_samples.
        let template_of = |row: usize| row * n_templates / num_samples;
        let mut mask = BinaryMatrix::ones(num_samples, n_features);
        for row in 0..num_samples {
            let t = template_of(row);
            for col in 0..n_features {
                mask.set(row, col, template_masks.get(t, col));
            }
        }

        let templates: Vec<Template> = (0..n_templates)
            .map(|t| self.build_template(&template_masks, t))
            .collect();

        let filled = match self.opts.filling {
            Filling::Parallel => self.fill_parallel(&templates, num_samples, template_of)?,
            Filling::Autoregressive => self.fill_autoregressive(&templates)?,
        };

        let raw = filled
            .into_iter()
            .map(|mut head| {
                head.extend(self.tail_tokens.iter().cloned());
                self.model.detokenize(&head)
            })
            .collect();
        Ok((raw, mask))
    }

    fn build_template(&self, template_masks: &BinaryMatrix, t: usize) -> Template {
        let mut tokens = self.head_tokens.clone();
        let mut masks = Vec::new();
        for (col, span) in self.spans.iter().enumerate() {
            if template_masks.get(t, col) {
                continue;
            }
            for pos in span.clone() {
                tokens[pos] = self.model.mask_token().to_string();
                masks.push(pos);
            }
        }
        masks.sort_unstable();
        Template { tokens, masks }
    }

    fn predict(&self, batch: &[Vec<String>]) -> Result<MaskPredictions> {
        let mut predictions = Vec::with_capacity(batch.len());
        for chunk in batch.chunks(self.opts.batch_size_lm) {
            let chunk_predictions = self
                .model
                .predict_masked(chunk, self.opts.top_n)
                .map_err(|e| AnchorError::language_model("mask prediction failed", e))?;
            if chunk_predictions.len() != chunk.len() {
                return Err(AnchorError::language_model(
                    "mask prediction returned the wrong number of sequences",
                    format!("expected {}, got {}", chunk.len(), chunk_predictions.len()).into(),
                ));
            }
            predictions.extend(chunk_predictions);
        }
        Ok(predictions)
    }

    /// Drop candidates that may not fill position `pos`.
    fn admissible<'c>(&self, pos: usize, candidates: &'c [Candidate]) -> Vec<&'c Candidate> {
        let word_start = self.ids_sample.binary_search(&pos).is_ok();
        candidates
            .iter()
            .filter(|c| c.token != self.model.mask_token())
            .filter(|c| {
                self.opts.sample_punctuation
                    || !self.model.is_punctuation(&c.token, &self.opts.punctuation)
            })
            .filter(|c| !(word_start && self.model.is_continuation(&c.token)))
            .take(self.opts.top_n)
            .collect()
    }

    fn pick(&mut self, candidates: &[&Candidate]) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let idx = if self.opts.use_proba {
            let scores: Vec<f64> = candidates
                .iter()
                .map(|c| f64::from(c.score) / self.opts.temperature)
                .collect();
            match WeightedIndex::new(softmax(&scores)) {
                Ok(weights) => weights.sample(&mut self.rng),
                Err(_) => self.rng.gen_range(0..candidates.len()),
            }
        } else {
            self.rng.gen_range(0..candidates.len())
        };
        Some(candidates[idx].token.clone())
    }

    fn fill_parallel(
        &mut self,
        templates: &[Template],
        num_samples: usize,
        template_of: impl Fn(usize) -> usize,
    ) -> Result<Vec<Vec<String>>> {
        let batch: Vec<Vec<String>> = templates.iter().map(|t| t.tokens.clone()).collect();
        let predictions = self.predict(&batch)?;

        let mut filled = Vec::with_capacity(num_samples);
        for row in 0..num_samples {
            let template = &templates[template_of(row)];
            let per_mask = &predictions[template_of(row)];
            if per_mask.len() != template.masks.len() {
                return Err(AnchorError::language_model(
                    "mask prediction returned the wrong number of masks",
                    format!("expected {}, got {}", template.masks.len(), per_mask.len()).into(),
                ));
            }
            let mut tokens = template.tokens.clone();
            for (&pos, candidates) in template.masks.iter().zip(per_mask) {
                let admissible = self.admissible(pos, candidates);
                tokens[pos] = self
                    .pick(&admissible)
                    .unwrap_or_else(|| self.head_tokens[pos].clone());
            }
            filled.push(tokens);
        }
        Ok(filled)
    }

    fn fill_autoregressive(&mut self, templates: &[Template]) -> Result<Vec<Vec<String>>> {
        let mut sequences: Vec<Vec<String>> = templates.iter().map(|t| t.tokens.clone()).collect();
        let mut pending: Vec<std::collections::VecDeque<usize>> = templates
            .iter()
            .map(|t| t.masks.iter().copied().collect())
            .collect();

        loop {
            let active: Vec<usize> = (0..sequences.len())
                .filter(|&i| !pending[i].is_empty())
                .collect();
            if active.is_empty() {
                break;
            }
            let batch: Vec<Vec<String>> = active.iter().map(|&i| sequences[i].clone()).collect();
            let predictions = self.predict(&batch)?;
            for (&i, per_mask) in active.iter().zip(&predictions) {
                let Some(pos) = pending[i].pop_front() else {
                    continue;
                };
                let first = per_mask.first().map(Vec::as_slice).unwrap_or_default();
                let admissible = self.admissible(pos, first);
                sequences[i][pos] = self
                    .pick(&admissible)
                    .unwrap_or_else(|| self.head_tokens[pos].clone());
            }
        }
        Ok(sequences)
    }
}
