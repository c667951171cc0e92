//! # Featurizer
//!
//! Turns an [`UtteranceRecord`] into fixed-length id sequences:
//!
//! ```text
//! input_ids:      [CLS] t1 t2 ... tn [SEP] 0 0 ...
//! attention_mask:   1   1  1  ...  1   1   0 0 ...
//! slot_label_ids:   0   s1 s2 ... sn   0   0 0 ...
//! ```
//!
//! with `n <= max_len - 2`. Longer utterances are truncated silently.

use serde::{Deserialize, Serialize};

use crate::data::record::UtteranceRecord;
use crate::error::{NluError, Result};
use crate::vocab::Vocabularies;

/// Slot label used at the `[CLS]`/`[SEP]` positions and for unknown tags.
pub const NON_ENTITY_ID: u32 = 0;
/// Fill value for every sequence beyond the attended positions.
pub const PAD_ID: u32 = 0;
/// Lowest positive-class weight a rebalanced intent may get.
pub const MIN_POS_WEIGHT: f32 = 1e-2;

/// Which split a record belongs to. Only training records update intent weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Eval,
    Infer,
}

/// Model-ready sequences for one utterance, all of length `max_len` except
/// `intent_labels` (one entry per intent class).
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturizedExample {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub token_type_ids: Vec<u32>,
    pub intent_labels: Vec<f32>,
    pub slot_label_ids: Vec<u32>,
}

impl FeaturizedExample {
    /// Number of attended positions, boundaries included.
    pub fn attended_len(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m == 1).count()
    }
}

/// A record together with its featurized form.
#[derive(Debug, Clone)]
pub struct Example {
    pub record: UtteranceRecord,
    pub features: FeaturizedExample,
}

/// How the accumulated intent counts become positive-class loss weights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentWeighting {
    /// Use `1 + occurrences` directly.
    #[default]
    Counts,
    /// Negative/positive ratio, log10-compressed when it exceeds 2.
    LogRatio,
}

/// Per-intent positive weights, starting at 1 and incremented per occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentWeights(Vec<f32>);

impl IntentWeights {
    pub fn new(num_intents: usize) -> Self {
        Self(vec![1.0; num_intents])
    }

    pub fn increment(&mut self, intent_id: u32) {
        if let Some(w) = self.0.get_mut(intent_id as usize) {
            *w += 1.0;
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply `weighting` given the number of training examples scanned.
    ///
    /// Ratios at or below zero (an intent present in every example, or an
    /// empty split) are clamped to [`MIN_POS_WEIGHT`].
    pub fn rebalance(&mut self, weighting: IntentWeighting, train_size: usize) {
        if weighting == IntentWeighting::Counts {
            return;
        }
        let n = train_size as f32;
        for w in &mut self.0 {
            let neg_pos = (n - *w) / *w;
            let ratio = if neg_pos > 2.0 { neg_pos.log10() } else { neg_pos };
            *w = ratio.max(MIN_POS_WEIGHT);
        }
    }
}

/// Converts records into [`FeaturizedExample`]s against a fixed vocabulary set.
#[derive(Debug, Clone, Copy)]
pub struct Featurizer<'a> {
    vocabs: &'a Vocabularies,
    max_len: usize,
}

impl<'a> Featurizer<'a> {
    /// `max_len` must leave room for `[CLS]`, `[SEP]` and one content token.
    pub fn new(vocabs: &'a Vocabularies, max_len: usize) -> Result<Self> {
        if max_len < 3 {
            return Err(NluError::Config(format!(
                "max_len must be at least 3, got {max_len}"
            )));
        }
        Ok(Self { vocabs, max_len })
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Content tokens kept after truncation.
    pub fn content_window(&self) -> usize {
        self.max_len - 2
    }

    /// Featurize one record. When `weights` is given every known intent bumps its weight.
    pub fn featurize(
        &self,
        record: &UtteranceRecord,
        weights: Option<&mut IntentWeights>,
    ) -> Result<FeaturizedExample> {
        let window = self.content_window();
        let tokens = &self.vocabs.tokens;

        let mut input_ids = Vec::with_capacity(self.max_len);
        input_ids.push(tokens.cls_id());
        input_ids.extend(record.tokens.iter().take(window).map(|t| tokens.token_id(t)));
        input_ids.push(tokens.sep_id());

        let mut slot_label_ids = Vec::with_capacity(self.max_len);
        slot_label_ids.push(NON_ENTITY_ID);
        slot_label_ids.extend(
            record
                .tags
                .iter()
                .take(window)
                .map(|t| self.vocabs.slots.id_or(t, NON_ENTITY_ID)),
        );
        slot_label_ids.push(NON_ENTITY_ID);

        if input_ids.len() != slot_label_ids.len() {
            return Err(NluError::DataIntegrity {
                utterance_id: record.utterance_id.clone(),
                tokens: input_ids.len(),
                labels: slot_label_ids.len(),
            });
        }

        let attended = input_ids.len();
        input_ids.resize(self.max_len, PAD_ID);
        slot_label_ids.resize(self.max_len, PAD_ID);

        let mut attention_mask = vec![1u32; attended];
        attention_mask.resize(self.max_len, 0);

        Ok(FeaturizedExample {
            input_ids,
            attention_mask,
            token_type_ids: vec![0; self.max_len],
            intent_labels: self.intent_vector(record, weights),
            slot_label_ids,
        })
    }

    fn intent_vector(
        &self,
        record: &UtteranceRecord,
        mut weights: Option<&mut IntentWeights>,
    ) -> Vec<f32> {
        let mut labels = vec![0.0f32; self.vocabs.intents.len()];
        for intent in &record.intents {
            match self.vocabs.intents.get_id(intent) {
                Some(id) => {
                    labels[id as usize] = 1.0;
                    if let Some(w) = weights.as_deref_mut() {
                        w.increment(id);
                    }
                }
                None => tracing::warn!(
                    utterance_id = %record.utterance_id,
                    intent = %intent,
                    "skipping intent missing from the intent vocabulary"
                ),
            }
        }
        labels
    }

    /// Featurize a whole split, returning the examples and the weight vector
    /// accumulated over them (all ones unless `split` is [`Split::Train`]).
    pub fn featurize_all(
        &self,
        records: Vec<UtteranceRecord>,
        split: Split,
    ) -> Result<(Vec<Example>, IntentWeights)> {
        let mut weights = IntentWeights::new(self.vocabs.intents.len());
        let mut examples = Vec::with_capacity(records.len());

        for record in records {
            let acc = (split == Split::Train).then_some(&mut weights);
            let features = self.featurize(&record, acc)?;
            examples.push(Example { record, features });
        }

        tracing::debug!(?split, weights = ?weights.as_slice(), "featurized split");
        Ok((examples, weights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::{TokenVocab, Vocab};

    fn vocabs() -> Vocabularies {
        Vocabularies {
            tokens: TokenVocab::new(Vocab::from_entries([
                "[PAD]", "[UNK]", "[CLS]", "[SEP]", "我", "要", "去", "北京",
            ]))
            .unwrap(),
            slots: Vocab::from_entries(["O", "B-loc", "I-loc", "B-time", "I-time"]),
            intents: Vocab::from_entries(["Request", "Inform", "greet"]),
        }
    }

    fn record(tokens: &[&str], tags: &[&str], intents: &[&str]) -> UtteranceRecord {
        UtteranceRecord {
            session_id: "1".into(),
            utterance_id: "0".into(),
            role: "usr".into(),
            tokens: tokens.iter().map(|s| s.to_string()).collect(),
            intents: intents.iter().map(|s| s.to_string()).collect(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            action: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_beijing_scenario() {
        let vocabs = vocabs();
        let featurizer = Featurizer::new(&vocabs, 8).unwrap();
        let rec = record(&["我", "要", "去", "北京"], &["O", "O", "O", "B-loc"], &["Inform"]);

        let ex = featurizer.featurize(&rec, None).unwrap();
        assert_eq!(ex.input_ids, vec![2, 4, 5, 6, 7, 3, 0, 0]);
        assert_eq!(ex.attention_mask, vec![1, 1, 1, 1, 1, 1, 0, 0]);
        assert_eq!(ex.token_type_ids, vec![0; 8]);
        assert_eq!(ex.slot_label_ids.len(), 8);
        for pos in [0, 5, 6, 7] {
            assert_eq!(ex.slot_label_ids[pos], NON_ENTITY_ID);
        }
        assert_eq!(ex.slot_label_ids[4], 1);
        assert_eq!(ex.intent_labels, vec![0.0, 1.0, 0.0]);
        assert_eq!(ex.attended_len(), 6);
    }

    #[test]
    fn test_truncation_keeps_window() {
        let vocabs = vocabs();
        let featurizer = Featurizer::new(&vocabs, 5).unwrap();
        let rec = record(
            &["我", "要", "去", "北京", "我"],
            &["O", "O", "O", "B-loc", "O"],
            &[],
        );

        let ex = featurizer.featurize(&rec, None).unwrap();
        assert_eq!(ex.input_ids, vec![2, 4, 5, 6, 3]);
        assert_eq!(ex.attention_mask, vec![1; 5]);
        assert_eq!(ex.slot_label_ids, vec![0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_sequence_layout_for_short_utterances() {
        let vocabs = vocabs();
        let featurizer = Featurizer::new(&vocabs, 10).unwrap();
        for n in 0..=8 {
            let tokens = vec!["我"; n];
            let tags = vec!["O"; n];
            let ex = featurizer.featurize(&record(&tokens, &tags, &[]), None).unwrap();
            assert_eq!(ex.input_ids.len(), 10);
            assert_eq!(ex.input_ids[0], 2);
            assert_eq!(ex.input_ids.iter().filter(|&&id| id == 2).count(), 1);
            assert_eq!(ex.input_ids[n + 1], 3);
            assert!(ex.input_ids[n + 2..].iter().all(|&id| id == PAD_ID));
        }
    }

    #[test]
    fn test_unknown_tokens_and_tags_fall_back() {
        let vocabs = vocabs();
        let featurizer = Featurizer::new(&vocabs, 6).unwrap();
        let rec = record(&["他", "去"], &["B-who", "O"], &["unknown"]);

        let ex = featurizer.featurize(&rec, None).unwrap();
        assert_eq!(ex.input_ids[1], 1);
        assert_eq!(ex.slot_label_ids[1], NON_ENTITY_ID);
        assert_eq!(ex.intent_labels, vec![0.0; 3]);
    }

    #[test]
    fn test_label_count_mismatch_is_rejected() {
        let vocabs = vocabs();
        let featurizer = Featurizer::new(&vocabs, 8).unwrap();
        let rec = record(&["我", "要", "去"], &["O", "O"], &[]);

        let err = featurizer.featurize(&rec, None).unwrap_err();
        assert!(matches!(
            err,
            NluError::DataIntegrity {
                tokens: 5,
                labels: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_mismatch_hidden_by_truncation_is_accepted() {
        let vocabs = vocabs();
        let featurizer = Featurizer::new(&vocabs, 4).unwrap();
        let rec = record(&["我", "要", "去"], &["O", "O"], &[]);
        assert!(featurizer.featurize(&rec, None).is_ok());
    }

    #[test]
    fn test_max_len_too_small() {
        let vocabs = vocabs();
        assert!(Featurizer::new(&vocabs, 2).is_err());
    }

    #[test]
    fn test_class_weight_accumulation() {
        let vocabs = vocabs();
        let featurizer = Featurizer::new(&vocabs, 8).unwrap();

        let mut records = Vec::new();
        for _ in 0..10 {
            records.push(record(&["我"], &["O"], &["Request"]));
        }
        for _ in 0..3 {
            records.push(record(&["去"], &["O"], &["Inform"]));
        }

        let (examples, weights) = featurizer
            .featurize_all(records.clone(), Split::Train)
            .unwrap();
        assert_eq!(examples.len(), 13);
        assert_eq!(weights.as_slice(), &[11.0, 4.0, 1.0]);

        let (_, eval_weights) = featurizer.featurize_all(records, Split::Eval).unwrap();
        assert_eq!(eval_weights.as_slice(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_log_ratio_rebalance() {
        let mut weights = IntentWeights(vec![11.0, 4.0, 1.0]);
        weights.rebalance(IntentWeighting::LogRatio, 13);
        let w = weights.as_slice();
        assert!((w[0] - 2.0 / 11.0).abs() < 1e-6);
        assert!((w[1] - 2.25f32.log10()).abs() < 1e-6);
        assert!((w[2] - 12.0f32.log10()).abs() < 1e-6);

        let mut unchanged = IntentWeights(vec![3.0]);
        unchanged.rebalance(IntentWeighting::Counts, 100);
        assert_eq!(unchanged.as_slice(), &[3.0]);
    }

    #[test]
    fn test_log_ratio_never_goes_negative() {
        // intent 0 occurs in all 4 examples, so its count is 5
        let mut weights = IntentWeights(vec![5.0, 4.0, 2.0]);
        weights.rebalance(IntentWeighting::LogRatio, 4);
        let w = weights.as_slice();
        assert_eq!(w[0], MIN_POS_WEIGHT);
        assert_eq!(w[1], MIN_POS_WEIGHT);
        assert!((w[2] - 1.0).abs() < 1e-6);

        let mut empty = IntentWeights::new(2);
        empty.rebalance(IntentWeighting::LogRatio, 0);
        assert!(empty.as_slice().iter().all(|&w| w == MIN_POS_WEIGHT));
    }
}
