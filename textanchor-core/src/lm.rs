//! Masked language model interface used by the `language_model` strategy.

use crate::error::BoxError;
use serde::{Deserialize, Serialize};

/// A candidate token for a masked position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub token: String,
    /// Unnormalized score (logit) of the token.
    pub score: f32,
}

impl Candidate {
    pub fn new(token: impl Into<String>, score: f32) -> Self {
        Self {
            token: token.into(),
            score,
        }
    }
}

/// Candidates for every mask of every sequence in a batch:
/// `[sequence][mask, in order of appearance][candidate, best first]`.
pub type MaskPredictions = Vec<Vec<Vec<Candidate>>>;

/// A masked language model operating on sub-word tokens.
///
/// Implementations wrap a tokenizer and a fill-mask head. The sampler only
/// relies on the methods below; vocabulary handling stays with the model.
pub trait LanguageModel: Send + Sync {
    /// Token that marks a position to be filled.
    fn mask_token(&self) -> &str;

    fn tokenize(&self, text: &str) -> Vec<String>;

    fn detokenize(&self, tokens: &[String]) -> String;

    /// Whether `token` continues the word started by the previous token.
    fn is_continuation(&self, token: &str) -> bool;

    /// Maximum number of tokens the model accepts; later tokens are never perturbed.
    fn max_len(&self) -> usize {
        512
    }

    /// Predict up to `top_n` candidates for every mask token of every sequence.
    fn predict_masked(
        &self,
        batch: &[Vec<String>],
        top_n: usize,
    ) -> Result<MaskPredictions, BoxError>;

    /// Whether `token` consists only of characters in `punctuation`.
    fn is_punctuation(&self, token: &str, punctuation: &str) -> bool {
        let text = self.detokenize(&[token.to_string()]);
        let text = text.trim();
        !text.is_empty() && text.chars().all(|c| punctuation.contains(c))
    }

    /// Whether the word starting at `idx` is one of `stopwords` (case-insensitive).
    fn is_stop_word(
        &self,
        head_tokens: &[String],
        idx: usize,
        punctuation: &str,
        stopwords: &[String],
    ) -> bool {
        if stopwords.is_empty() {
            return false;
        }
        let word = self.select_word(head_tokens, idx, punctuation).to_lowercase();
        stopwords.iter().any(|s| s.trim().to_lowercase() == word)
    }

    /// Full word starting at `idx`: the head token plus its continuation pieces.
    fn select_word(&self, head_tokens: &[String], idx: usize, punctuation: &str) -> String {
        if idx >= head_tokens.len() {
            return String::new();
        }
        let end = word_end(self, head_tokens, idx, punctuation);
        self.detokenize(&head_tokens[idx..end]).trim().to_string()
    }
}

/// Exclusive end of the word starting at `idx`.
pub(crate) fn word_end<M: LanguageModel + ?Sized>(
    model: &M,
    head_tokens: &[String],
    idx: usize,
    punctuation: &str,
) -> usize {
    let mut end = idx + 1;
    while end < head_tokens.len()
        && model.is_continuation(&head_tokens[end])
        && !model.is_punctuation(&head_tokens[end], punctuation)
    {
        end += 1;
    }
    end
}
