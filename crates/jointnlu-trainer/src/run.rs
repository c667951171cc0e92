//! End-to-end orchestration of the train, eval and infer modes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::Device;
use candle_nn::VarMap;
use jointnlu_core::eval::write_predictions;
use jointnlu_core::{
    load_records, EvalMode, EvalOutcome, EvalReport, Evaluator, Example, Featurizer,
    IntentWeights, Split, Vocabularies,
};
use tracing::info;

use crate::checkpoint;
use crate::config::TaskConfig;
use crate::model::{build_model, TaskModel};
use crate::observer::{LossHistory, TracingObserver};
use crate::trainer::{TrainSummary, Trainer};

pub const LOSS_HISTORY_FILE: &str = "loss_history.json";

/// What each enabled mode produced.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub train: Option<TrainSummary>,
    pub eval: Vec<(PathBuf, EvalReport)>,
    pub predictions: Option<PathBuf>,
}

/// Validate `config`, then train, evaluate and infer as its mode flags say.
pub fn run(config: &TaskConfig) -> Result<RunSummary> {
    config.validate()?;
    let device = config.device()?;
    if !device.is_cpu() {
        device.set_seed(config.seed)?;
    }
    info!(device = ?device, seed = config.seed, "starting run");

    for dir in [&config.model_save_path, &config.output_path] {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let vocabs = Vocabularies::load(
        &config.vocab_path,
        &config.slot_vocab_path,
        &config.intent_vocab_path,
    )?;
    let mut varmap = VarMap::new();
    let model = build_model(config, &vocabs, &varmap, &device)?;

    let mut summary = RunSummary::default();

    if config.do_train {
        if let Some(path) = &config.bert_model_path {
            checkpoint::init_from_pretrained(&varmap, path, &device)?;
        }
        summary.train = Some(train(config, &model, &varmap, &vocabs, &device)?);
    }

    if config.do_eval || config.do_infer {
        checkpoint::load(&mut varmap, &config.model_save_path)?;
    }
    let evaluator = Evaluator::new(&vocabs, config.max_len)
        .with_threshold(config.intent_threshold)
        .with_batch_size(config.eval_batch_size);

    let mut predictions = Vec::new();
    let passes = [
        (EvalMode::Eval, config.do_eval, &config.dev_data_paths),
        (EvalMode::Infer, config.do_infer, &config.test_data_paths),
    ];
    for (mode, enabled, paths) in passes {
        if !enabled {
            continue;
        }
        for path in paths {
            info!(path = %path.display(), ?mode, "running evaluator");
            let (examples, _) = read_split(config, &vocabs, path, mode.split())?;
            info!(size = examples.len(), "dataset loaded");
            match evaluator.evaluate(&model, &examples, &device, mode)? {
                EvalOutcome::Report(report) => summary.eval.push((path.clone(), report)),
                EvalOutcome::Predictions(batch) => predictions.extend(batch),
            }
        }
    }
    if config.do_infer {
        summary.predictions = Some(write_predictions(&predictions, &config.output_path)?);
    }

    Ok(summary)
}

fn train(
    config: &TaskConfig,
    model: &TaskModel,
    varmap: &VarMap,
    vocabs: &Vocabularies,
    device: &Device,
) -> Result<TrainSummary> {
    let (examples, mut weights) = read_split(config, vocabs, &config.train_data_path, Split::Train)?;
    weights.rebalance(config.intent_weighting, examples.len());
    info!(weights = ?weights.as_slice(), "intent class weights");

    let valid = match config.dev_data_paths.first() {
        Some(path) if config.do_eval => Some(read_split(config, vocabs, path, Split::Eval)?.0),
        _ => None,
    };

    let history = LossHistory::to_file(config.output_path.join(LOSS_HISTORY_FILE));
    let mut trainer = Trainer::new(config, model, varmap, vocabs, device)
        .with_observer(TracingObserver)
        .with_observer(history);
    trainer.train(&examples, &weights, valid.as_deref())
}

fn read_split(
    config: &TaskConfig,
    vocabs: &Vocabularies,
    path: &Path,
    split: Split,
) -> Result<(Vec<Example>, IntentWeights)> {
    let records = load_records(path)?;
    let featurizer = Featurizer::new(vocabs, config.max_len)?;
    let (examples, weights) = featurizer
        .featurize_all(records, split)
        .with_context(|| format!("failed to featurize {}", path.display()))?;
    Ok((examples, weights))
}
