//! Stop-word list used to drop filler words before counting.

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

/// Built-in list, used when no stop-words file is configured.
const DEFAULT_STOP_WORDS: &[&str] = &[
    "el", "la", "que", "y", "a", "en", "un", "es", "se", "no", "te", "lo", "le", "da", "su",
    "por", "son", "con", "para", "al", "del", "los", "las", "una", "como", "pero", "sus", "me",
    "hasta", "hay", "donde", "han", "quien", "están", "estado", "desde", "todo", "nos",
    "durante", "todos", "podido", "tres", "tan", "así", "veinte", "año", "uno", "ya", "poco",
    "he", "esa", "otro", "algunos", "algunas", "ser", "dos", "también", "era", "eran", "vez",
    "tienen", "porque", "muy", "sin", "sobre", "mi", "contra", "solo", "yo", "pueden", "de",
];

#[derive(Debug, Error)]
pub enum StopWordsError {
    #[error("failed to read stop words file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stop words file {path} is not a JSON array of strings: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Case-insensitive stop-word set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopWords {
    words: HashSet<String>,
}

impl Default for StopWords {
    fn default() -> Self {
        Self::new(DEFAULT_STOP_WORDS.iter().copied())
    }
}

impl StopWords {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            words: words.into_iter().map(|w| w.as_ref().to_lowercase()).collect(),
        }
    }

    pub fn empty() -> Self {
        Self { words: HashSet::new() }
    }

    /// Load a JSON array of strings (e.g. `["the", "a", "of"]`).
    pub fn from_file(path: &Path) -> Result<Self, StopWordsError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| StopWordsError::Read {
            path: display.clone(),
            source,
        })?;
        let words: Vec<String> =
            serde_json::from_str(&raw).map_err(|source| StopWordsError::Parse { path: display, source })?;
        Ok(Self::new(words))
    }

    /// Load from `path` when given, falling back to the built-in list on any error.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::from_file(path) {
            Ok(words) => {
                info!(path = %path.display(), count = words.len(), "loaded stop words");
                words
            }
            Err(err) => {
                warn!(error = %err, "falling back to built-in stop words");
                Self::default()
            }
        }
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(&word.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}
