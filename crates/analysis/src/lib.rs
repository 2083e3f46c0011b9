//! Text analysis for uploaded documents.
//!
//! Pure, synchronous functions: tokenization, stop-word filtering, word
//! frequency and a naive leading-sentences summary.

pub mod analyzer;
pub mod stop_words;
pub mod summary;

pub use analyzer::{MAX_TOP_WORDS, TextAnalysis, TextAnalyzer};
pub use stop_words::{StopWords, StopWordsError};
pub use summary::summarize;
