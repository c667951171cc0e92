//! Building the joint model a task configuration asks for.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use jointnlu_core::model::{BertEncoder, EmbeddingEncoder, EncoderAdapter, EncoderOutput};
use jointnlu_core::{JointModel, Vocabularies};
use tracing::info;

use crate::config::{EncoderKind, TaskConfig};

/// Either encoder the trainer can run.
pub enum TaskEncoder {
    Bert(BertEncoder),
    Embedding(EmbeddingEncoder),
}

impl EncoderAdapter for TaskEncoder {
    fn hidden_size(&self) -> usize {
        match self {
            TaskEncoder::Bert(e) => e.hidden_size(),
            TaskEncoder::Embedding(e) => e.hidden_size(),
        }
    }

    fn encode(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        attention_mask: &Tensor,
        train: bool,
    ) -> jointnlu_core::Result<EncoderOutput> {
        match self {
            TaskEncoder::Bert(e) => e.encode(input_ids, token_type_ids, attention_mask, train),
            TaskEncoder::Embedding(e) => e.encode(input_ids, token_type_ids, attention_mask, train),
        }
    }
}

pub type TaskModel = JointModel<TaskEncoder>;

/// Build the model with fresh variables registered in `varmap`.
///
/// The encoder lives under `bert.`, the heads at the root.
pub fn build_model(
    config: &TaskConfig,
    vocabs: &Vocabularies,
    varmap: &VarMap,
    device: &Device,
) -> Result<TaskModel> {
    let vb = VarBuilder::from_varmap(varmap, DType::F32, device);

    let encoder = match &config.encoder {
        EncoderKind::Bert => {
            let path = config
                .model_config_path
                .as_ref()
                .context("the bert encoder needs model_config_path")?;
            let bert_config = BertEncoder::read_config(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            TaskEncoder::Bert(BertEncoder::load(vb.pp("bert"), &bert_config)?)
        }
        EncoderKind::Embedding { hidden_size } => TaskEncoder::Embedding(EmbeddingEncoder::new(
            vocabs.tokens.len(),
            config.max_len,
            *hidden_size,
            vb.pp("bert"),
        )?),
    };

    let model = JointModel::new(encoder, vocabs, config.head_config(), vb)?;
    info!(
        hidden = model.encoder().hidden_size(),
        intents = vocabs.num_intent_labels(),
        slots = vocabs.num_slot_labels(),
        variables = varmap.all_vars().len(),
        "model built"
    );
    Ok(model)
}
