use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while featurizing, running or scoring the joint model.
#[derive(Debug, Error)]
pub enum NluError {
    /// Token and slot-label sequences disagree after truncation.
    #[error(
        "utterance {utterance_id}: {tokens} tokens but {labels} slot labels after truncation"
    )]
    DataIntegrity {
        /// Utterance whose record was rejected.
        utterance_id: String,
        /// Assembled token-id count (including `[CLS]`/`[SEP]`).
        tokens: usize,
        /// Assembled slot-label count (including boundary labels).
        labels: usize,
    },

    /// A decoded tag path does not line up with the utterance it came from.
    #[error("utterance {utterance_id}: decoded {actual} content tags, expected {expected}")]
    FeaturizationMismatch {
        /// Utterance whose prediction was misaligned.
        utterance_id: String,
        /// `min(len(utterance), max_len - 2)`.
        expected: usize,
        /// Length of the decoded path minus its boundary positions.
        actual: usize,
    },

    /// A vocabulary file is missing, empty or lacks a required entry.
    #[error("vocabulary {path:?}: {reason}")]
    Vocab {
        /// File the vocabulary was read from.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// An invalid configuration value or model dimension.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Reading a data or vocabulary file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The training-data file or model config is not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Candle ML framework error.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for jointnlu core operations.
pub type Result<T> = std::result::Result<T, NluError>;
