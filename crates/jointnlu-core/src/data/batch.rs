//! Stacking featurized examples into batch tensors.

use candle_core::{Device, Tensor};

use crate::data::featurizer::Example;
use crate::error::{NluError, Result};

/// A batch of featurized examples on a device.
///
/// Sequence tensors are `u32` of shape `[batch, max_len]`; `intent_labels`
/// is `f32` of shape `[batch, num_intents]`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub token_type_ids: Tensor,
    pub intent_labels: Tensor,
    pub slot_label_ids: Tensor,
}

impl Batch {
    pub fn from_examples(examples: &[&Example], device: &Device) -> Result<Self> {
        let first = examples
            .first()
            .ok_or_else(|| NluError::Config("cannot build an empty batch".into()))?;
        let batch = examples.len();
        let seq_len = first.features.input_ids.len();
        let num_intents = first.features.intent_labels.len();

        let mut input_ids = Vec::with_capacity(batch * seq_len);
        let mut attention_mask = Vec::with_capacity(batch * seq_len);
        let mut token_type_ids = Vec::with_capacity(batch * seq_len);
        let mut slot_label_ids = Vec::with_capacity(batch * seq_len);
        let mut intent_labels = Vec::with_capacity(batch * num_intents);

        for example in examples {
            let f = &example.features;
            input_ids.extend_from_slice(&f.input_ids);
            attention_mask.extend_from_slice(&f.attention_mask);
            token_type_ids.extend_from_slice(&f.token_type_ids);
            slot_label_ids.extend_from_slice(&f.slot_label_ids);
            intent_labels.extend_from_slice(&f.intent_labels);
        }

        Ok(Self {
            input_ids: Tensor::from_vec(input_ids, (batch, seq_len), device)?,
            attention_mask: Tensor::from_vec(attention_mask, (batch, seq_len), device)?,
            token_type_ids: Tensor::from_vec(token_type_ids, (batch, seq_len), device)?,
            intent_labels: Tensor::from_vec(intent_labels, (batch, num_intents), device)?,
            slot_label_ids: Tensor::from_vec(slot_label_ids, (batch, seq_len), device)?,
        })
    }

    pub fn len(&self) -> usize {
        self.input_ids.dims().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows `start..start + len` of every tensor.
    pub fn narrow(&self, start: usize, len: usize) -> Result<Self> {
        Ok(Self {
            input_ids: self.input_ids.narrow(0, start, len)?,
            attention_mask: self.attention_mask.narrow(0, start, len)?,
            token_type_ids: self.token_type_ids.narrow(0, start, len)?,
            intent_labels: self.intent_labels.narrow(0, start, len)?,
            slot_label_ids: self.slot_label_ids.narrow(0, start, len)?,
        })
    }
}
