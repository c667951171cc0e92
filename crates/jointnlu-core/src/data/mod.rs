//! Dialogue records and their conversion into fixed-length model inputs.

pub mod batch;
pub mod featurizer;
pub mod record;

pub use batch::Batch;
pub use featurizer::{
    Example, FeaturizedExample, Featurizer, IntentWeighting, IntentWeights, Split,
    MIN_POS_WEIGHT, NON_ENTITY_ID, PAD_ID,
};
pub use record::{load_records, parse_records, UtteranceRecord};
