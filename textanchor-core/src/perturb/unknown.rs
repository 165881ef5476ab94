//! `unknown` strategy: replace words outside the anchor with `UNK`.

use super::{BinaryMatrix, anchor_flags};
use crate::nlp::{NlpModel, RuleTokenizer, Token, join_tokens, leading_text};
use crate::strategy::UnknownOptions;
use rand::Rng;
use rand::rngs::StdRng;
use std::sync::Arc;

/// Token-masking sampler. Every token of the instance is a feature.
pub struct UnknownSampler {
    nlp: Option<Arc<dyn NlpModel>>,
    opts: UnknownOptions,
    leading: String,
    tokens: Vec<Token>,
    words: Vec<String>,
    positions: Vec<usize>,
}

impl UnknownSampler {
    pub const UNK: &'static str = "UNK";

    pub fn new(nlp: Option<Arc<dyn NlpModel>>, opts: UnknownOptions) -> Self {
        Self {
            nlp,
            opts,
            leading: String::new(),
            tokens: Vec::new(),
            words: Vec::new(),
            positions: Vec::new(),
        }
    }

    pub fn options(&self) -> &UnknownOptions {
        &self.opts
    }

    pub fn bind(&mut self, text: &str) {
        self.tokens = match &self.nlp {
            Some(nlp) => nlp.tokenize(text),
            None => RuleTokenizer.tokenize(text),
        };
        self.leading = leading_text(text, &self.tokens).to_string();
        self.words = self.tokens.iter().map(|t| t.text.clone()).collect();
        self.positions = self.tokens.iter().map(|t| t.idx).collect();
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Character offsets of the words.
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    pub fn num_features(&self) -> usize {
        self.tokens.len()
    }

    pub fn generate(
        &self,
        anchor: &[usize],
        num_samples: usize,
        rng: &mut StdRng,
    ) -> (Vec<String>, BinaryMatrix) {
        let n_features = self.num_features();
        let fixed = anchor_flags(anchor, n_features);
        let mut mask = BinaryMatrix::ones(num_samples, n_features);

        for (col, is_fixed) in fixed.iter().enumerate() {
            if *is_fixed {
                continue;
            }
            for row in 0..num_samples {
                if rng.gen_bool(self.opts.sample_proba) {
                    mask.set(row, col, false);
                }
            }
        }

        let raw = (0..num_samples)
            .map(|row| join_tokens(&self.leading, &self.tokens, |col| (!mask.get(row, col)).then_some(Self::UNK)))
            .collect();
        (raw, mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn sampler(sample_proba: f64) -> UnknownSampler {
        let mut sampler = UnknownSampler::new(None, UnknownOptions { sample_proba });
        sampler.bind("this movie is good");
        sampler
    }

    #[test]
    fn test_bind_records_words_and_offsets() {
        let sampler = sampler(0.5);
        assert_eq!(sampler.words(), &["this", "movie", "is", "good"]);
        assert_eq!(sampler.positions(), &[0, 5, 11, 14]);
        assert_eq!(sampler.num_features(), 4);
    }

    #[test]
    fn test_anchor_words_are_never_masked() {
        let sampler = sampler(1.0);
        let mut rng = StdRng::seed_from_u64(0);
        let (raw, mask) = sampler.generate(&[3], 5, &mut rng);
        assert_eq!(raw.len(), 5);
        assert_eq!(mask.rows(), 5);
        for (row, text) in raw.iter().enumerate() {
            assert_eq!(text, "UNK UNK UNK good");
            assert_eq!(mask.row(row), &[0, 0, 0, 1]);
        }
    }

    #[test]
    fn test_zero_probability_keeps_text() {
        let sampler = sampler(0.0);
        let mut rng = StdRng::seed_from_u64(0);
        let (raw, mask) = sampler.generate(&[], 3, &mut rng);
        assert!(raw.iter().all(|t| t == "this movie is good"));
        assert!(mask.iter_rows().all(|r| r.iter().all(|v| *v == 1)));
    }

    #[test]
    fn test_leading_whitespace_survives_sampling() {
        let mut sampler = UnknownSampler::new(None, UnknownOptions { sample_proba: 0.0 });
        sampler.bind("   this is good");
        let mut rng = StdRng::seed_from_u64(0);
        let (raw, _) = sampler.generate(&[], 2, &mut rng);
        assert!(raw.iter().all(|t| t == "   this is good"));

        sampler.bind("no indent");
        let (raw, _) = sampler.generate(&[], 1, &mut rng);
        assert_eq!(raw[0], "no indent");
    }

    #[test]
    fn test_mask_matches_raw_text() {
        let sampler = sampler(0.5);
        let mut rng = StdRng::seed_from_u64(42);
        let (raw, mask) = sampler.generate(&[0], 50, &mut rng);
        for (row, text) in raw.iter().enumerate() {
            let words: Vec<&str> = text.split(' ').collect();
            for (col, word) in words.iter().enumerate() {
                assert_eq!(*word == UnknownSampler::UNK, !mask.get(row, col));
            }
        }
    }
}
