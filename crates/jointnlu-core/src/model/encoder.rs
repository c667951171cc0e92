//! Encoder adapters: anything that maps token ids and masks to per-token
//! hidden states.

use std::path::Path;

use candle_core::{DType, Tensor};
use candle_nn::{Dropout, Embedding, LayerNorm, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};

use crate::error::Result;

/// Hidden states produced by an encoder.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// `[batch, seq_len, hidden]`
    pub sequence: Tensor,
    /// `[batch, hidden]`
    pub pooled: Tensor,
}

/// A pretrained (or stand-in) transformer consumed as a black box.
pub trait EncoderAdapter {
    fn hidden_size(&self) -> usize;

    /// All id tensors are `[batch, seq_len]`.
    fn encode(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        attention_mask: &Tensor,
        train: bool,
    ) -> Result<EncoderOutput>;
}

/// BERT encoder from `candle-transformers`.
pub struct BertEncoder {
    bert: BertModel,
    hidden_size: usize,
}

impl BertEncoder {
    pub fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let bert = BertModel::load(vb, config)?;
        Ok(Self {
            bert,
            hidden_size: config.hidden_size,
        })
    }

    /// Read a Hugging Face `config.json`.
    pub fn read_config<P: AsRef<Path>>(path: P) -> Result<BertConfig> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl EncoderAdapter for BertEncoder {
    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn encode(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        attention_mask: &Tensor,
        _train: bool,
    ) -> Result<EncoderOutput> {
        let sequence = self
            .bert
            .forward(input_ids, token_type_ids, Some(attention_mask))?;
        let pooled = sequence.narrow(1, 0, 1)?.squeeze(1)?;
        Ok(EncoderOutput { sequence, pooled })
    }
}

/// Token + position embeddings with layer norm.
///
/// A small trainable encoder for smoke runs and tests when no pretrained
/// checkpoint is at hand.
pub struct EmbeddingEncoder {
    tokens: Embedding,
    positions: Embedding,
    norm: LayerNorm,
    dropout: Dropout,
    hidden_size: usize,
}

impl EmbeddingEncoder {
    pub fn new(vocab_size: usize, max_len: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        let tokens = candle_nn::embedding(vocab_size, hidden_size, vb.pp("word_embeddings"))?;
        let positions =
            candle_nn::embedding(max_len, hidden_size, vb.pp("position_embeddings"))?;
        let norm = candle_nn::layer_norm(hidden_size, 1e-12, vb.pp("LayerNorm"))?;

        Ok(Self {
            tokens,
            positions,
            norm,
            dropout: Dropout::new(0.1),
            hidden_size,
        })
    }
}

impl EncoderAdapter for EmbeddingEncoder {
    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn encode(
        &self,
        input_ids: &Tensor,
        _token_type_ids: &Tensor,
        _attention_mask: &Tensor,
        train: bool,
    ) -> Result<EncoderOutput> {
        let (_, seq_len) = input_ids.dims2()?;
        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;

        let xs = self
            .tokens
            .forward(input_ids)?
            .broadcast_add(&self.positions.forward(&positions)?)?;
        let xs = self.norm.forward(&xs)?;
        let sequence = self.dropout.forward(&xs, train)?.to_dtype(DType::F32)?;
        let pooled = sequence.narrow(1, 0, 1)?.squeeze(1)?;
        Ok(EncoderOutput { sequence, pooled })
    }
}
