//! How one optimizer step spreads a batch over model replicas.
//!
//! Replicas share one set of parameters, so averaging the per-shard losses
//! before a single backward pass is a synchronous gradient all-reduce.

use candle_core::Tensor;
use jointnlu_core::{Batch, EncoderAdapter, JointLoss, JointModel, LossWeights, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicaStrategy {
    #[default]
    Single,
    Sharded { shards: usize },
}

impl ReplicaStrategy {
    pub fn from_shards(shards: usize) -> Self {
        if shards <= 1 {
            ReplicaStrategy::Single
        } else {
            ReplicaStrategy::Sharded { shards }
        }
    }

    /// Contiguous, non-empty shards covering the batch in order.
    pub fn split(&self, batch: &Batch) -> Result<Vec<Batch>> {
        let shards = match *self {
            ReplicaStrategy::Single => return Ok(vec![batch.clone()]),
            ReplicaStrategy::Sharded { shards } => shards,
        };

        let len = batch.len();
        let chunk = len.div_ceil(shards.max(1)).max(1);
        let mut parts = Vec::with_capacity(shards);
        let mut start = 0;
        while start < len {
            let size = chunk.min(len - start);
            parts.push(batch.narrow(start, size)?);
            start += size;
        }
        Ok(parts)
    }

    /// Forward every shard and average the resulting losses.
    pub fn loss<E: EncoderAdapter>(
        &self,
        model: &JointModel<E>,
        batch: &Batch,
        intent_weights: &Tensor,
        weights: LossWeights,
    ) -> Result<JointLoss> {
        let shards = self.split(batch)?;
        let count = shards.len() as f64;

        let mut intent = Vec::with_capacity(shards.len());
        let mut slot = Vec::with_capacity(shards.len());
        for shard in &shards {
            let output = model.forward(shard, true)?;
            let loss = model.loss(shard, &output, intent_weights, weights)?;
            intent.push(loss.intent);
            slot.push(loss.slot);
        }

        if intent.len() == 1 {
            return JointLoss::combine(intent.remove(0), slot.remove(0), weights);
        }
        let intent = Tensor::stack(&intent, 0)?.sum_all()?.affine(1.0 / count, 0.0)?;
        let slot = Tensor::stack(&slot, 0)?.sum_all()?.affine(1.0 / count, 0.0)?;
        JointLoss::combine(intent, slot, weights)
    }
}
