//! Entity-level slot metrics and set-level intent metrics.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::tagging::{extract_entities, Entity};

/// Precision / recall / F1 triple.
///
/// Precision serializes as `acc`, the name slot reports have always used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Prf {
    #[serde(rename = "acc")]
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl Prf {
    /// From gold, predicted and correct counts. Empty denominators give 0.
    pub fn from_counts(origin: usize, found: usize, right: usize) -> Self {
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(right, found);
        let recall = ratio(right, origin);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        Self {
            precision,
            recall,
            f1,
        }
    }
}

impl fmt::Display for Prf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "acc = {:.4}, recall = {:.4}, f1 = {:.4}",
            self.precision, self.recall, self.f1
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    origin: usize,
    found: usize,
    right: usize,
}

/// Accumulates gold and predicted entities over many tag sequences.
#[derive(Debug, Clone, Default)]
pub struct EntityScorer {
    by_type: BTreeMap<String, Counts>,
}

impl EntityScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.by_type.clear();
    }

    /// Add one predicted/gold pair of tag sequences.
    pub fn update<S: AsRef<str>, T: AsRef<str>>(&mut self, pred_tags: &[S], gold_tags: &[T]) {
        let gold = extract_entities(gold_tags);
        let pred = extract_entities(pred_tags);

        for entity in &gold {
            self.counts(entity).origin += 1;
        }
        for entity in &pred {
            let hit = gold.contains(entity);
            let counts = self.counts(entity);
            counts.found += 1;
            if hit {
                counts.right += 1;
            }
        }
    }

    fn counts(&mut self, entity: &Entity) -> &mut Counts {
        self.by_type.entry(entity.entity_type.clone()).or_default()
    }

    /// Overall score across every entity type.
    pub fn overall(&self) -> Prf {
        let total = self.by_type.values().fold(Counts::default(), |acc, c| Counts {
            origin: acc.origin + c.origin,
            found: acc.found + c.found,
            right: acc.right + c.right,
        });
        Prf::from_counts(total.origin, total.found, total.right)
    }

    /// Score per entity type, over every type seen in gold or predictions.
    pub fn by_type(&self) -> BTreeMap<String, Prf> {
        self.by_type
            .iter()
            .map(|(ty, c)| (ty.clone(), Prf::from_counts(c.origin, c.found, c.right)))
            .collect()
    }
}

/// Micro-averaged set comparison of predicted and gold intents.
#[derive(Debug, Clone, Default)]
pub struct IntentScorer {
    true_positive: usize,
    false_positive: usize,
    false_negative: usize,
}

impl IntentScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<S: AsRef<str>, T: AsRef<str>>(&mut self, predicted: &[S], gold: &[T]) {
        let predicted: HashSet<&str> = predicted.iter().map(AsRef::as_ref).collect();
        let gold: HashSet<&str> = gold.iter().map(AsRef::as_ref).collect();

        let hits = predicted.intersection(&gold).count();
        self.true_positive += hits;
        self.false_positive += predicted.len() - hits;
        self.false_negative += gold.len() - hits;
    }

    pub fn result(&self) -> Prf {
        Prf::from_counts(
            self.true_positive + self.false_negative,
            self.true_positive + self.false_positive,
            self.true_positive,
        )
    }
}
