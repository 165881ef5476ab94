//! `similarity` strategy: replace words with embedding-space neighbours.

use super::{BinaryMatrix, anchor_flags, softmax};
use crate::nlp::{Neighbor, NlpModel, Token, join_tokens, leading_text};
use crate::strategy::SimilarityOptions;
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use std::sync::Arc;
use tracing::debug;

/// Neighbour table of one token.
struct TokenNeighbors {
    neighbors: Vec<Neighbor>,
    weights: Option<WeightedIndex<f64>>,
}

/// Similarity sampler. Every token of the instance is a feature; tokens
/// without neighbours in the lexicon are never changed.
pub struct SimilaritySampler {
    nlp: Arc<dyn NlpModel>,
    opts: SimilarityOptions,
    leading: String,
    tokens: Vec<Token>,
    words: Vec<String>,
    positions: Vec<usize>,
    neighbors: Vec<TokenNeighbors>,
}

impl SimilaritySampler {
    pub fn new(nlp: Arc<dyn NlpModel>, opts: SimilarityOptions) -> Self {
        Self {
            nlp,
            opts,
            leading: String::new(),
            tokens: Vec::new(),
            words: Vec::new(),
            positions: Vec::new(),
            neighbors: Vec::new(),
        }
    }

    pub fn options(&self) -> &SimilarityOptions {
        &self.opts
    }

    pub fn bind(&mut self, text: &str) {
        self.tokens = self.nlp.tokenize(text);
        self.leading = leading_text(text, &self.tokens).to_string();
        self.words = self.tokens.iter().map(|t| t.text.clone()).collect();
        self.positions = self.tokens.iter().map(|t| t.idx).collect();
        self.neighbors = self
            .tokens
            .iter()
            .map(|token| {
                let neighbors = self.nlp.neighbors(&token.text, self.opts.top_n);
                let weights = if self.opts.use_proba && !neighbors.is_empty() {
                    let scores: Vec<f64> = neighbors
                        .iter()
                        .map(|n| f64::from(n.similarity) / self.opts.temperature)
                        .collect();
                    WeightedIndex::new(softmax(&scores)).ok()
                } else {
                    None
                };
                TokenNeighbors { neighbors, weights }
            })
            .collect();
        debug!(
            tokens = self.tokens.len(),
            with_neighbors = self.neighbors.iter().filter(|n| !n.neighbors.is_empty()).count(),
            "Bound similarity sampler"
        );
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

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
        let mut chosen: Vec<Option<&str>> = vec![None; num_samples * n_features];

        for (col, table) in self.neighbors.iter().enumerate() {
            if fixed[col] || table.neighbors.is_empty() {
                continue;
            }
            for row in 0..num_samples {
                if !rng.gen_bool(self.opts.sample_proba) {
                    continue;
                }
                let pick = match &table.weights {
                    Some(weights) => weights.sample(rng),
                    None => rng.gen_range(0..table.neighbors.len()),
                };
                let word = table.neighbors[pick].word.as_str();
                mask.set(row, col, word == self.words[col]);
                chosen[row * n_features + col] = Some(word);
            }
        }

        let raw = (0..num_samples)
            .map(|row| join_tokens(&self.leading, &self.tokens, |col| chosen[row * n_features + col]))
            .collect();
        (raw, mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::EmbeddingLexicon;
    use rand::SeedableRng;

    fn lexicon() -> Arc<dyn NlpModel> {
        Arc::new(
            EmbeddingLexicon::parse(
                "good -5 1.0 0.0\n\
                 great -6 0.9 0.1\n\
                 fine -7 0.8 0.2\n\
                 movie -5 0.0 1.0\n\
                 film -6 0.1 0.9\n",
            )
            .unwrap(),
        )
    }

    fn sampler(opts: SimilarityOptions) -> SimilaritySampler {
        let mut sampler = SimilaritySampler::new(lexicon(), opts);
        sampler.bind("this movie is good");
        sampler
    }

    #[test]
    fn test_words_without_neighbors_are_kept() {
        let sampler = sampler(SimilarityOptions {
            sample_proba: 1.0,
            ..Default::default()
        });
        let mut rng = StdRng::seed_from_u64(3);
        let (raw, mask) = sampler.generate(&[], 20, &mut rng);
        for (row, text) in raw.iter().enumerate() {
            let words: Vec<&str> = text.split(' ').collect();
            assert_eq!(words[0], "this");
            assert_eq!(words[2], "is");
            assert_ne!(words[1], "movie");
            assert_ne!(words[3], "good");
            assert_eq!(mask.row(row), &[1, 0, 1, 0]);
        }
    }

    #[test]
    fn test_anchor_is_fixed() {
        let sampler = sampler(SimilarityOptions {
            sample_proba: 1.0,
            use_proba: true,
            temperature: 0.5,
            ..Default::default()
        });
        let mut rng = StdRng::seed_from_u64(11);
        let (raw, mask) = sampler.generate(&[1, 3], 10, &mut rng);
        assert!(raw.iter().all(|t| t == "this movie is good"));
        assert!(mask.iter_rows().all(|r| r == [1, 1, 1, 1]));
    }

    #[test]
    fn test_top_n_limits_candidates() {
        let sampler = sampler(SimilarityOptions {
            sample_proba: 1.0,
            top_n: 1,
            ..Default::default()
        });
        let mut rng = StdRng::seed_from_u64(5);
        let (raw, _) = sampler.generate(&[1], 10, &mut rng);
        assert!(raw.iter().all(|t| t == "this movie is great"));
    }
}
