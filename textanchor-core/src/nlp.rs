//! Tokenization and word-embedding lookups used by the `unknown` and
//! `similarity` perturbation strategies.

use crate::error::{AnchorError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+(?:'\w+)?|[^\w\s]").expect("token pattern is valid"));

/// A token of the instance being explained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    /// Character offset of the token in the original text.
    pub idx: usize,
    /// Whitespace following the token in the original text.
    pub whitespace: String,
    pub is_punct: bool,
}

impl Token {
    pub fn is_lower(&self) -> bool {
        self.text == self.text.to_lowercase()
    }
}

/// A word close to a query word in embedding space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub word: String,
    pub similarity: f32,
}

/// Tokenizer plus vocabulary-level similarity search.
pub trait NlpModel: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<Token>;

    /// Up to `top_n` words most similar to `word`, most similar first. The
    /// query word itself is never returned.
    fn neighbors(&self, word: &str, top_n: usize) -> Vec<Neighbor>;
}

/// Text before the first token, or all of `text` when there are no tokens.
pub fn leading_text<'t>(text: &'t str, tokens: &[Token]) -> &'t str {
    let end = tokens.first().map_or(text.len(), |first| {
        text.char_indices()
            .nth(first.idx)
            .map_or(text.len(), |(byte, _)| byte)
    });
    &text[..end]
}

/// Rebuild text from `leading` and the tokens, substituting `replacement(i)`
/// when it returns a word.
pub fn join_tokens<'a, F>(leading: &str, tokens: &'a [Token], mut replacement: F) -> String
where
    F: FnMut(usize) -> Option<&'a str>,
{
    let mut out = String::from(leading);
    for (i, token) in tokens.iter().enumerate() {
        out.push_str(replacement(i).unwrap_or(&token.text));
        out.push_str(&token.whitespace);
    }
    out
}

/// Regex tokenizer splitting words (with contractions) and single symbols.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleTokenizer;

impl RuleTokenizer {
    pub fn tokenize(&self, text: &str) -> Vec<Token> {
        let matches: Vec<_> = TOKEN_RE.find_iter(text).collect();
        let mut tokens = Vec::with_capacity(matches.len());
        for (i, m) in matches.iter().enumerate() {
            let next_start = matches.get(i + 1).map_or(text.len(), |next| next.start());
            let trailing = &text[m.end()..next_start];
            let word = m.as_str();
            tokens.push(Token {
                text: word.to_string(),
                idx: text[..m.start()].chars().count(),
                whitespace: trailing.to_string(),
                is_punct: word.chars().all(|c| !c.is_alphanumeric() && c != '_'),
            });
        }
        tokens
    }
}

/// An embedding table entry.
#[derive(Debug, Clone, PartialEq)]
struct Lexeme {
    vector: Vec<f32>,
    norm: f32,
    log_prob: f32,
}

/// In-memory word embedding lexicon with a rule tokenizer.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingLexicon {
    words: Vec<String>,
    index: HashMap<String, usize>,
    lexemes: Vec<Lexeme>,
    min_log_prob: f32,
    tokenizer: RuleTokenizer,
}

impl EmbeddingLexicon {
    /// Words rarer than this are only used when the query itself is rare.
    pub const DEFAULT_MIN_LOG_PROB: f32 = -15.0;

    pub fn new() -> Self {
        Self {
            min_log_prob: Self::DEFAULT_MIN_LOG_PROB,
            ..Default::default()
        }
    }

    pub fn with_min_log_prob(mut self, min_log_prob: f32) -> Self {
        self.min_log_prob = min_log_prob;
        self
    }

    /// Insert or replace a word.
    pub fn insert(&mut self, word: impl Into<String>, vector: Vec<f32>, log_prob: f32) {
        let word = word.into();
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        let lexeme = Lexeme {
            vector,
            norm,
            log_prob,
        };
        match self.index.get(&word) {
            Some(&i) => self.lexemes[i] = lexeme,
            None => {
                self.index.insert(word.clone(), self.words.len());
                self.words.push(word);
                self.lexemes.push(lexeme);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.index.contains_key(word)
    }

    /// Parse a lexicon from lines of `word log_prob v1 v2 ...`.
    ///
    /// Blank lines and lines starting with `#` are skipped. Every vector must
    /// have the dimension of the first one.
    pub fn parse(source: &str) -> Result<Self> {
        let mut lexicon = Self::new();
        let mut dim = None;
        for (lineno, line) in source.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(word), Some(log_prob)) = (fields.next(), fields.next()) else {
                return Err(AnchorError::configuration(format!(
                    "lexicon line {}: expected `word log_prob v1 v2 ...`",
                    lineno + 1
                )));
            };
            let log_prob: f32 = log_prob.parse().map_err(|_| {
                AnchorError::configuration(format!(
                    "lexicon line {}: invalid log probability {log_prob:?}",
                    lineno + 1
                ))
            })?;
            let vector = fields
                .map(str::parse::<f32>)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    AnchorError::configuration(format!("lexicon line {}: {e}", lineno + 1))
                })?;
            match dim {
                None => dim = Some(vector.len()),
                Some(d) if d != vector.len() => {
                    return Err(AnchorError::configuration(format!(
                        "lexicon line {}: vector has {} dimensions, expected {d}",
                        lineno + 1,
                        vector.len()
                    )));
                }
                Some(_) => {}
            }
            lexicon.insert(word, vector, log_prob);
        }
        Ok(lexicon)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::parse(&source)
    }

    fn similarity(&self, a: &Lexeme, b: &Lexeme) -> f32 {
        if a.norm == 0.0 || b.norm == 0.0 {
            return 0.0;
        }
        let dot: f32 = a.vector.iter().zip(&b.vector).map(|(x, y)| x * y).sum();
        dot / (a.norm * b.norm)
    }
}

impl NlpModel for EmbeddingLexicon {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        self.tokenizer.tokenize(text)
    }

    fn neighbors(&self, word: &str, top_n: usize) -> Vec<Neighbor> {
        let Some(&query_idx) = self.index.get(word) else {
            return Vec::new();
        };
        let query = &self.lexemes[query_idx];
        let query_is_lower = word == word.to_lowercase();
        let query_is_rare = query.log_prob < self.min_log_prob;

        let mut scored: Vec<Neighbor> = self
            .words
            .iter()
            .zip(&self.lexemes)
            .enumerate()
            .filter(|(i, (candidate, lexeme))| {
                *i != query_idx
                    && (lexeme.log_prob >= self.min_log_prob || query_is_rare)
                    && (candidate.to_lowercase() == **candidate) == query_is_lower
            })
            .map(|(_, (candidate, lexeme))| Neighbor {
                word: candidate.clone(),
                similarity: self.similarity(query, lexeme),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_n);
        scored
    }
}
