//! Evaluation and inference over featurized splits.

pub mod evaluator;
pub mod metrics;

pub use evaluator::{
    write_predictions, EvalMode, EvalOutcome, EvalReport, Evaluator, Prediction,
    DEFAULT_INTENT_THRESHOLD,
};
pub use metrics::{EntityScorer, IntentScorer, Prf};
