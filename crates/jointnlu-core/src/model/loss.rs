//! Joint objective: weighted multi-label BCE for intents plus CRF NLL for slots.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::{NluError, Result};

/// Scale applied to each head's loss before summing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossWeights {
    pub intent: f64,
    pub slot: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            intent: 1.0,
            slot: 1.0,
        }
    }
}

/// Scalar losses for one batch. `total` is the tensor to differentiate.
#[derive(Debug, Clone)]
pub struct JointLoss {
    pub total: Tensor,
    pub intent: Tensor,
    pub slot: Tensor,
}

impl JointLoss {
    pub fn combine(intent: Tensor, slot: Tensor, weights: LossWeights) -> Result<Self> {
        let total = (intent.affine(weights.intent, 0.0)? + slot.affine(weights.slot, 0.0)?)?;
        Ok(Self {
            total,
            intent,
            slot,
        })
    }

    /// `(total, intent, slot)` as host floats.
    pub fn values(&self) -> Result<(f32, f32, f32)> {
        Ok((
            self.total.to_scalar::<f32>()?,
            self.intent.to_scalar::<f32>()?,
            self.slot.to_scalar::<f32>()?,
        ))
    }
}

/// Binary cross-entropy on logits with a per-class positive weight, averaged
/// over every element.
///
/// * `logits`, `targets` - `[batch, classes]`
/// * `pos_weight` - `[classes]`
pub fn bce_with_pos_weight(logits: &Tensor, targets: &Tensor, pos_weight: &Tensor) -> Result<Tensor> {
    if logits.dims() != targets.dims() {
        return Err(NluError::Config(format!(
            "intent logits {:?} and targets {:?} differ in shape",
            logits.dims(),
            targets.dims()
        )));
    }
    let classes = logits.dims().last().copied().unwrap_or(0);
    if pos_weight.dims() != [classes].as_slice() {
        return Err(NluError::Config(format!(
            "pos_weight {:?} does not cover {classes} intent classes",
            pos_weight.dims()
        )));
    }

    // softplus(-x) = max(-x, 0) + log(1 + exp(-|x|))
    let softplus_neg = (logits.neg()?.relu()?
        + logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?)?;
    // 1 + (pos_weight - 1) * y
    let log_weight = targets
        .broadcast_mul(&pos_weight.affine(1.0, -1.0)?.unsqueeze(0)?)?
        .affine(1.0, 1.0)?;
    let negative = (targets.affine(-1.0, 1.0)? * logits)?;

    let loss = (negative + (log_weight * softplus_neg)?)?;
    Ok(loss.mean_all()?)
}
