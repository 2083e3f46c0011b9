//! Document analyzer: counts, frequent words and summary for one text.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::stop_words::StopWords;
use crate::summary::summarize;

/// Most top words reported per document.
pub const MAX_TOP_WORDS: usize = 10;

/// Characters that separate words.
const WORD_SEPARATORS: &[char] = &[
    ' ', '\t', '\n', '\r', '.', ',', ';', ':', '!', '?', '(', ')', '[', ']', '{', '}', '"', '\'',
    '-', '_', '=', '+', '*', '/', '\\', '|', '&', '^', '%', '$', '#', '@', '¡', '¿',
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextAnalysis {
    /// Words left after dropping one-letter tokens and stop words.
    pub word_count: usize,
    /// Non-empty lines.
    pub line_count: usize,
    /// Unicode scalar values in the raw text.
    pub character_count: usize,
    /// Most frequent counted words, most frequent first.
    pub top_words: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct TextAnalyzer {
    stop_words: StopWords,
    top_words: usize,
    summary_sentences: usize,
}

impl Default for TextAnalyzer {
    fn default() -> Self {
        Self::new(StopWords::default())
    }
}

impl TextAnalyzer {
    pub fn new(stop_words: StopWords) -> Self {
        Self {
            stop_words,
            top_words: MAX_TOP_WORDS,
            summary_sentences: 3,
        }
    }

    /// Report at most `n` top words, never more than [`MAX_TOP_WORDS`].
    pub fn with_top_words(mut self, n: usize) -> Self {
        self.top_words = n.min(MAX_TOP_WORDS);
        self
    }

    pub fn with_summary_sentences(mut self, n: usize) -> Self {
        self.summary_sentences = n;
        self
    }

    pub fn analyze(&self, text: &str) -> TextAnalysis {
        let line_count = text.split('\n').filter(|l| !l.is_empty()).count();

        let words: Vec<String> = text
            .split(WORD_SEPARATORS)
            .filter(|w| w.chars().count() > 1)
            .map(str::to_lowercase)
            .filter(|w| !self.stop_words.contains(w))
            .collect();

        let analysis = TextAnalysis {
            word_count: words.len(),
            line_count,
            character_count: text.chars().count(),
            top_words: most_frequent(&words, self.top_words),
            summary: summarize(text, self.summary_sentences),
        };

        debug!(
            words = analysis.word_count,
            lines = analysis.line_count,
            characters = analysis.character_count,
            "analyzed text"
        );
        analysis
    }
}

/// Top `n` words by count. Equal counts keep first-occurrence order.
fn most_frequent(words: &[String], n: usize) -> Vec<String> {
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<(&str, usize)> = Vec::new();

    for w in words {
        match first_seen.get(w.as_str()) {
            Some(&idx) => counts[idx].1 += 1,
            None => {
                first_seen.insert(w.as_str(), counts.len());
                counts.push((w.as_str(), 1));
            }
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().take(n).map(|(w, _)| w.to_string()).collect()
}
