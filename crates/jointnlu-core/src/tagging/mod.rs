pub mod bio_tags;

pub use bio_tags::{extract_entities, start_constraints, transition_constraints, BioTag, Entity};
