//! Runs a model over a featurized split and reconciles its outputs against
//! gold labels (evaluation) or turns them into entity spans (inference).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::Device;
use serde::Serialize;
use tracing::info;

use crate::data::{Batch, Example, Split};
use crate::error::{NluError, Result};
use crate::eval::metrics::{EntityScorer, IntentScorer, Prf};
use crate::model::{EncoderAdapter, JointModel};
use crate::tagging::{extract_entities, Entity};
use crate::vocab::Vocabularies;

/// Probability an intent must strictly exceed to be predicted.
pub const DEFAULT_INTENT_THRESHOLD: f32 = 0.8;

const OUTSIDE_TAG: &str = "O";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Gold labels present; score them.
    Eval,
    /// No gold labels; emit predictions.
    Infer,
}

impl EvalMode {
    /// The featurization split records for this mode belong to.
    pub fn split(self) -> Split {
        match self {
            EvalMode::Eval => Split::Eval,
            EvalMode::Infer => Split::Infer,
        }
    }
}

/// Metrics from one evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalReport {
    pub intent: Prf,
    pub slot: Prf,
    pub slot_by_type: BTreeMap<String, Prf>,
}

impl EvalReport {
    /// Slot F1, the score used for model selection.
    pub fn score(&self) -> f64 {
        self.slot.f1
    }

    pub fn log(&self) {
        info!(
            precision = self.intent.precision,
            recall = self.intent.recall,
            f1 = self.intent.f1,
            "intent"
        );
        info!(
            acc = self.slot.precision,
            recall = self.slot.recall,
            f1 = self.slot.f1,
            "slot"
        );
        for (ty, prf) in &self.slot_by_type {
            info!(entity = %ty, "{prf}");
        }
    }
}

/// One utterance's inference output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub session_id: String,
    pub utterance_id: String,
    pub role: String,
    pub utterance: Vec<String>,
    pub intents: Vec<String>,
    pub entities: Vec<Entity>,
}

#[derive(Debug, Clone)]
pub enum EvalOutcome {
    Report(EvalReport),
    Predictions(Vec<Prediction>),
}

/// Decoded output for one example, before scoring.
struct Decoded {
    intents: Vec<String>,
    tags: Vec<String>,
}

pub struct Evaluator<'a> {
    vocabs: &'a Vocabularies,
    max_len: usize,
    threshold: f32,
    batch_size: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(vocabs: &'a Vocabularies, max_len: usize) -> Self {
        Self {
            vocabs,
            max_len,
            threshold: DEFAULT_INTENT_THRESHOLD,
            batch_size: 32,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Names of intents whose probability is strictly above the threshold.
    pub fn select_intents(&self, probabilities: &[f32]) -> Vec<String> {
        probabilities
            .iter()
            .enumerate()
            .filter(|(_, p)| **p > self.threshold)
            .filter_map(|(id, _)| self.vocabs.intents.word(id as u32))
            .map(str::to_string)
            .collect()
    }

    /// Score `examples` or predict on them, as `mode` says.
    pub fn evaluate<E: EncoderAdapter>(
        &self,
        model: &JointModel<E>,
        examples: &[Example],
        device: &Device,
        mode: EvalMode,
    ) -> Result<EvalOutcome> {
        match mode {
            EvalMode::Eval => self.score(model, examples, device).map(EvalOutcome::Report),
            EvalMode::Infer => self.infer(model, examples, device).map(EvalOutcome::Predictions),
        }
    }

    /// Score predictions against gold slot tags and intents.
    pub fn score<E: EncoderAdapter>(
        &self,
        model: &JointModel<E>,
        examples: &[Example],
        device: &Device,
    ) -> Result<EvalReport> {
        let mut entities = EntityScorer::new();
        let mut intents = IntentScorer::new();

        let decoded = self.decode_all(model, examples, device)?;
        for (example, decoded) in examples.iter().zip(&decoded) {
            let text_len = decoded.tags.len();
            let gold_tags: Vec<&str> = example.features.slot_label_ids[1..text_len + 1]
                .iter()
                .map(|&id| self.tag_name(id))
                .collect();
            entities.update(&decoded.tags, &gold_tags);
            intents.update(&decoded.intents, &example.record.intents);
        }

        let report = EvalReport {
            intent: intents.result(),
            slot: entities.overall(),
            slot_by_type: entities.by_type(),
        };
        info!(examples = examples.len(), "evaluation finished");
        report.log();
        Ok(report)
    }

    /// Predict intents and entity spans without gold labels.
    pub fn infer<E: EncoderAdapter>(
        &self,
        model: &JointModel<E>,
        examples: &[Example],
        device: &Device,
    ) -> Result<Vec<Prediction>> {
        let decoded = self.decode_all(model, examples, device)?;
        let predictions = examples
            .iter()
            .zip(decoded)
            .map(|(example, decoded)| {
                let record = &example.record;
                let entities = extract_entities(&decoded.tags)
                    .into_iter()
                    .map(|e| e.with_text(&record.tokens))
                    .collect();
                Prediction {
                    session_id: record.session_id.clone(),
                    utterance_id: record.utterance_id.clone(),
                    role: record.role.clone(),
                    utterance: record.tokens.clone(),
                    intents: decoded.intents,
                    entities,
                }
            })
            .collect::<Vec<_>>();
        info!(examples = predictions.len(), "inference finished");
        Ok(predictions)
    }

    fn decode_all<E: EncoderAdapter>(
        &self,
        model: &JointModel<E>,
        examples: &[Example],
        device: &Device,
    ) -> Result<Vec<Decoded>> {
        let mut decoded = Vec::with_capacity(examples.len());

        for chunk in examples.chunks(self.batch_size) {
            let refs: Vec<&Example> = chunk.iter().collect();
            let batch = Batch::from_examples(&refs, device)?;
            let output = model.forward(&batch, false)?;
            let paths = model.decode(&output, &batch.attention_mask)?;
            let logits: Vec<Vec<f32>> = output.intent_logits.to_vec2()?;

            for ((example, path), logits) in chunk.iter().zip(paths).zip(logits) {
                let probabilities: Vec<f32> = logits.iter().map(|&x| sigmoid(x)).collect();
                decoded.push(Decoded {
                    intents: self.select_intents(&probabilities),
                    tags: self.content_tags(example, &path)?,
                });
            }
        }

        Ok(decoded)
    }

    /// Strip the `[CLS]`/`[SEP]` positions and check alignment with the utterance.
    fn content_tags(&self, example: &Example, path: &[u32]) -> Result<Vec<String>> {
        let expected = example.record.tokens.len().min(self.max_len - 2);
        let content: &[u32] = if path.len() >= 2 {
            &path[1..path.len() - 1]
        } else {
            &[]
        };
        if content.len() != expected {
            return Err(NluError::FeaturizationMismatch {
                utterance_id: example.record.utterance_id.clone(),
                expected,
                actual: content.len(),
            });
        }
        Ok(content.iter().map(|&id| self.tag_name(id).to_string()).collect())
    }

    fn tag_name(&self, id: u32) -> &'a str {
        self.vocabs.slots.word(id).unwrap_or(OUTSIDE_TAG)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Write predictions as pretty JSON to `<dir>/predictions.json`.
pub fn write_predictions<P: AsRef<Path>>(predictions: &[Prediction], dir: P) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let path = dir.join("predictions.json");
    fs::write(&path, serde_json::to_string_pretty(predictions)?)?;
    info!(path = %path.display(), count = predictions.len(), "predictions written");
    Ok(path)
}
