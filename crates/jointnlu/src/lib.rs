//! # jointnlu
//!
//! Joint intent classification and slot tagging for task-oriented dialogue.
//! Re-exports the model/evaluation core and the training loop.

pub use jointnlu_core as core;
pub use jointnlu_trainer as trainer;

pub use jointnlu_core::{
    EvalMode, EvalReport, Evaluator, Featurizer, JointModel, NluError, Prediction, Result,
    TokenVocab, Vocab, Vocabularies,
};
pub use jointnlu_trainer::{run, RunSummary, TaskConfig, Trainer};
