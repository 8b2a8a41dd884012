//! Keyword extraction and keyword-set similarity

use crate::error::Result;
use regex::Regex;
use std::collections::HashSet;

/// Closed list of low-information words: articles, conjunctions, pronouns,
/// prepositions and common auxiliary verbs
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "nor", "so", "yet", "if", "then", "than", "in", "on",
    "at", "to", "for", "of", "with", "by", "from", "about", "into", "is", "am", "are", "was",
    "were", "be", "been", "being", "have", "has", "had", "do", "does", "did", "will", "would",
    "shall", "should", "can", "could", "may", "might", "must", "this", "that", "these", "those",
    "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us", "them", "my", "your",
    "his", "its", "our", "their", "what", "which", "who", "whom", "where", "when", "why", "how",
];

/// Lower-cases text and deletes punctuation without splitting on it
///
/// `"Don't e-mail"` becomes `"dont email"`. Query keywords and stored chunk
/// text go through the same rules so they compare token for token.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    punctuation: Regex,
}

impl TextNormalizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            punctuation: Regex::new(r"[^\w\s]")?,
        })
    }

    pub fn normalize(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        self.punctuation.replace_all(&lowered, "").into_owned()
    }

    /// Whitespace-separated tokens of the normalized text
    pub fn tokens(&self, text: &str) -> HashSet<String> {
        self.normalize(text)
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}

/// Extracts search keywords from free text
#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    normalizer: TextNormalizer,
    stop_words: HashSet<&'static str>,
    max_keywords: usize,
    min_len: usize,
}

impl KeywordExtractor {
    /// Create an extractor keeping at most `max_keywords` tokens of at least `min_len` chars
    pub fn new(max_keywords: usize, min_len: usize) -> Result<Self> {
        Ok(Self {
            normalizer: TextNormalizer::new()?,
            stop_words: STOP_WORDS.iter().copied().collect(),
            max_keywords,
            min_len,
        })
    }

    /// Lower-case, strip punctuation, split on whitespace, drop stop words and
    /// short tokens, keep the first `max_keywords` in their original order
    pub fn extract(&self, text: &str) -> Vec<String> {
        let cleaned = self.normalizer.normalize(text);

        cleaned
            .split_whitespace()
            .filter(|token| token.chars().count() >= self.min_len)
            .filter(|token| !self.stop_words.contains(*token))
            .take(self.max_keywords)
            .map(str::to_string)
            .collect()
    }

    /// Keyword set of a text, using the same rules as [`extract`](Self::extract)
    pub fn keyword_set(&self, text: &str) -> HashSet<String> {
        self.extract(text).into_iter().collect()
    }
}

/// Jaccard index of two sets; 0.0 when both are empty
pub fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }

    let intersection = a.intersection(b).count();
    intersection as f32 / union as f32
}
