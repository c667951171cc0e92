//! # JointNLU Core
//!
//! Joint intent classification and slot filling for task-oriented dialogue.
//! A shared encoder feeds two heads: a mean-pooled multi-label intent
//! classifier and a BiLSTM-CRF slot tagger over BIO tags.
//!
//! ## Quick Start
//!
//! ```rust
//! use jointnlu_core::tagging::extract_entities;
//!
//! let entities = extract_entities(&["O", "B-loc", "I-loc", "O"]);
//! assert_eq!(entities.len(), 1);
//! assert_eq!(entities[0].entity_type, "loc");
//! assert_eq!((entities[0].start, entities[0].end), (1, 2));
//! ```
pub mod crf;
pub mod data;
pub mod error;
pub mod eval;
pub mod model;
pub mod tagging;
pub mod vocab;

// Re-export primary API
pub use crf::{Crf, ViterbiDecoder};
pub use data::{
    load_records, Batch, Example, FeaturizedExample, Featurizer, IntentWeighting, IntentWeights,
    Split, UtteranceRecord,
};
pub use error::{NluError, Result};
pub use eval::{EvalMode, EvalOutcome, EvalReport, Evaluator, Prediction, Prf};
pub use model::{
    BertEncoder, EmbeddingEncoder, EncoderAdapter, HeadConfig, JointLoss, JointModel, JointOutput,
    LossWeights,
};
pub use tagging::{BioTag, Entity};
pub use vocab::{TokenVocab, Vocab, Vocabularies};
