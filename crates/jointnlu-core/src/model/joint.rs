//! Dual-head model: mean-pooled intent classifier and BiLSTM-CRF slot tagger
//! on top of a shared encoder.

use candle_core::{DType, Tensor};
use candle_nn::{Dropout, Linear, Module, VarBuilder};

use crate::crf::Crf;
use crate::data::Batch;
use crate::error::Result;
use crate::model::bilstm::BiLstm;
use crate::model::encoder::EncoderAdapter;
use crate::model::loss::{bce_with_pos_weight, JointLoss, LossWeights};
use crate::tagging::{start_constraints, transition_constraints};
use crate::vocab::Vocabularies;

/// Head hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadConfig {
    /// Hidden size of each LSTM direction.
    pub hidden_units: usize,
    pub dropout: f32,
    /// Forbid `I-x` after anything but `B-x`/`I-x` when decoding.
    pub constrained_decoding: bool,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            hidden_units: 128,
            dropout: 0.5,
            constrained_decoding: false,
        }
    }
}

/// Raw head outputs for one batch.
#[derive(Debug, Clone)]
pub struct JointOutput {
    /// `[batch, num_intents]`
    pub intent_logits: Tensor,
    /// `[batch, seq_len, num_slots]`
    pub emissions: Tensor,
}

pub struct JointModel<E> {
    encoder: E,
    bilstm: BiLstm,
    dropout: Dropout,
    intent_head: Linear,
    slot_head: Linear,
    crf: Crf,
}

impl<E: EncoderAdapter> JointModel<E> {
    /// Build the heads under `vb`. The encoder is built by the caller so it can
    /// live under its own prefix.
    pub fn new(encoder: E, vocabs: &Vocabularies, config: HeadConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = encoder.hidden_size();
        let num_intents = vocabs.num_intent_labels();
        let num_slots = vocabs.num_slot_labels();

        let bilstm = BiLstm::new(hidden, config.hidden_units, vb.pp("lstm"))?;
        let intent_head = candle_nn::linear(hidden, num_intents, vb.pp("intent_classifier"))?;
        let slot_head =
            candle_nn::linear(bilstm.output_size(), num_slots, vb.pp("slot_classifier"))?;

        let mut crf = Crf::new(num_slots, vb.pp("crf"))?;
        if config.constrained_decoding {
            let tags: Vec<&str> = vocabs.slots.words().collect();
            crf = crf.with_constraints(transition_constraints(&tags), start_constraints(&tags))?;
        }

        Ok(Self {
            encoder,
            bilstm,
            dropout: Dropout::new(config.dropout),
            intent_head,
            slot_head,
            crf,
        })
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn crf(&self) -> &Crf {
        &self.crf
    }

    pub fn forward(&self, batch: &Batch, train: bool) -> Result<JointOutput> {
        let encoded = self.encoder.encode(
            &batch.input_ids,
            &batch.token_type_ids,
            &batch.attention_mask,
            train,
        )?;
        let sequence = encoded.sequence;

        // Masked sum divided by the full padded length.
        let mask = batch
            .attention_mask
            .to_dtype(sequence.dtype())?
            .unsqueeze(2)?;
        let pooled = sequence.broadcast_mul(&mask)?.mean(1)?;
        let pooled = self.dropout.forward(&pooled, train)?;
        let intent_logits = self.intent_head.forward(&pooled)?;

        let states = self.bilstm.forward(&sequence)?;
        let states = self.dropout.forward(&states, train)?;
        let emissions = self.slot_head.forward(&states)?;

        Ok(JointOutput {
            intent_logits: intent_logits.to_dtype(DType::F32)?,
            emissions: emissions.to_dtype(DType::F32)?,
        })
    }

    /// Best slot path per example over its attended positions, boundaries included.
    pub fn decode(&self, output: &JointOutput, attention_mask: &Tensor) -> Result<Vec<Vec<u32>>> {
        self.crf.decode(&output.emissions, attention_mask)
    }

    /// * `intent_weights` - `[num_intents]` positive-class weights
    pub fn loss(
        &self,
        batch: &Batch,
        output: &JointOutput,
        intent_weights: &Tensor,
        weights: LossWeights,
    ) -> Result<JointLoss> {
        let intent = bce_with_pos_weight(&output.intent_logits, &batch.intent_labels, intent_weights)?;
        let slot = self
            .crf
            .log_likelihood(&output.emissions, &batch.attention_mask, &batch.slot_label_ids)?
            .mean_all()?
            .neg()?;
        JointLoss::combine(intent, slot, weights)
    }
}
