//! Training loop for the joint model.

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use jointnlu_core::{Batch, EncoderAdapter, Evaluator, Example, IntentWeights, JointModel, Vocabularies};
use tracing::info;

use crate::checkpoint;
use crate::config::TaskConfig;
use crate::early_stop::{EarlyStopping, StopDecision};
use crate::observer::TrainingObserver;
use crate::schedule::LinearWarmup;
use crate::strategy::ReplicaStrategy;

/// What a finished training run reports.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSummary {
    pub global_step: usize,
    pub epochs_run: usize,
    pub best_score: Option<f64>,
    pub stopped_early: bool,
}

pub struct Trainer<'a, E> {
    config: &'a TaskConfig,
    model: &'a JointModel<E>,
    varmap: &'a VarMap,
    vocabs: &'a Vocabularies,
    device: &'a Device,
    strategy: ReplicaStrategy,
    observers: Vec<Box<dyn TrainingObserver + 'a>>,
    global_step: usize,
}

impl<'a, E: EncoderAdapter> Trainer<'a, E> {
    pub fn new(
        config: &'a TaskConfig,
        model: &'a JointModel<E>,
        varmap: &'a VarMap,
        vocabs: &'a Vocabularies,
        device: &'a Device,
    ) -> Self {
        Self {
            config,
            model,
            varmap,
            vocabs,
            device,
            strategy: ReplicaStrategy::from_shards(config.shards),
            observers: Vec::new(),
            global_step: 0,
        }
    }

    pub fn with_observer(mut self, observer: impl TrainingObserver + 'a) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    fn emit(&mut self, name: &str, value: f64) {
        let step = self.global_step;
        for observer in &mut self.observers {
            observer.on_metric(step, name, value);
        }
    }

    fn evaluator(&self) -> Evaluator<'a> {
        Evaluator::new(self.vocabs, self.config.max_len)
            .with_threshold(self.config.intent_threshold)
            .with_batch_size(self.config.eval_batch_size)
    }

    /// Train on `train`, validating on `valid` after every epoch.
    ///
    /// The best checkpoint is saved whenever validation improves. Without
    /// validation or with early stopping off, the final model is saved.
    pub fn train(
        &mut self,
        train: &[Example],
        intent_weights: &IntentWeights,
        valid: Option<&[Example]>,
    ) -> Result<TrainSummary> {
        let config = self.config;
        info!(size = train.len(), "train dataset");
        if let Some(valid) = valid {
            info!(size = valid.len(), "valid dataset");
        }

        let batch_size = config.train_batch_size;
        let schedule = LinearWarmup::new(
            config.lr,
            config.warmup_steps,
            LinearWarmup::planned_steps(train.len(), batch_size, config.epochs),
        );
        let mut optimizer = AdamW::new(
            self.varmap.all_vars(),
            ParamsAdamW {
                lr: schedule.rate(0),
                ..Default::default()
            },
        )?;
        let pos_weight = Tensor::new(intent_weights.as_slice(), self.device)?;

        let mut rng = oorandom::Rand32::new(config.seed);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut early_stopping = EarlyStopping::new(config.patience);
        let mut saved_best = false;
        let mut epochs_run = 0;
        let mut loss_buffer = 0.0;

        for epoch in 1..=config.epochs {
            epochs_run = epoch;
            shuffle(&mut order, &mut rng);

            for indices in order.chunks(batch_size) {
                let examples: Vec<&Example> = indices.iter().map(|&i| &train[i]).collect();
                let batch = Batch::from_examples(&examples, self.device)?;

                optimizer.set_learning_rate(schedule.rate(self.global_step));
                let loss = self
                    .strategy
                    .loss(self.model, &batch, &pos_weight, config.loss_weights)
                    .with_context(|| format!("step {} failed", self.global_step + 1))?;
                optimizer.backward_step(&loss.total)?;
                self.global_step += 1;

                let (total, intent, slot) = loss.values()?;
                self.emit("loss", f64::from(total));
                self.emit("intent_loss", f64::from(intent));
                self.emit("slot_loss", f64::from(slot));

                loss_buffer += f64::from(total);
                if self.global_step % config.log_steps == 0 {
                    info!(
                        epoch,
                        step = self.global_step,
                        loss = loss_buffer / config.log_steps as f64,
                        lr = optimizer.learning_rate(),
                        "training"
                    );
                    loss_buffer = 0.0;
                }

                if let Some(valid) = valid {
                    if config.eval_steps > 0 && self.global_step % config.eval_steps == 0 {
                        let report = self.evaluator().score(self.model, valid, self.device)?;
                        self.emit("valid_slot_f1", report.slot.f1);
                        self.emit("valid_intent_f1", report.intent.f1);
                    }
                }
            }

            let Some(valid) = valid else {
                continue;
            };
            info!(epoch, step = self.global_step, "evaluating");
            let report = self.evaluator().score(self.model, valid, self.device)?;
            self.emit("slot_f1", report.slot.f1);
            self.emit("intent_f1", report.intent.f1);

            if config.early_stop {
                match early_stopping.update(report.score()) {
                    StopDecision::Improved => {
                        checkpoint::save(self.varmap, &config.model_save_path)?;
                        saved_best = true;
                    }
                    StopDecision::Wait => {}
                    StopDecision::Stop => {
                        info!(epoch, "early stopping");
                        break;
                    }
                }
            }
        }

        if !saved_best {
            checkpoint::save(self.varmap, &config.model_save_path)?;
        }
        for observer in &mut self.observers {
            observer.on_finish()?;
        }

        info!(global_step = self.global_step, "training finished");
        Ok(TrainSummary {
            global_step: self.global_step,
            epochs_run,
            best_score: early_stopping.best(),
            stopped_early: early_stopping.stopped(),
        })
    }
}

/// Fisher-Yates shuffle driven by the run's seeded generator.
fn shuffle(order: &mut [usize], rng: &mut oorandom::Rand32) {
    for i in (1..order.len()).rev() {
        let j = rng.rand_range(0..(i as u32 + 1)) as usize;
        order.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::Path;

    use jointnlu_core::{Featurizer, Split, TokenVocab, UtteranceRecord, Vocab};

    use super::*;
    use crate::config::EncoderKind;
    use crate::model::{build_model, TaskModel};

    const SLOT_BIAS: &str = "slot_classifier.bias";

    fn vocabs() -> Vocabularies {
        Vocabularies {
            tokens: TokenVocab::new(Vocab::from_entries([
                "[PAD]", "[UNK]", "[CLS]", "[SEP]", "我", "要", "去", "北京", "上海",
            ]))
            .unwrap(),
            slots: Vocab::from_entries(["O", "B-loc", "I-loc"]),
            intents: Vocab::from_entries(["Inform", "Request", "General"]),
        }
    }

    fn record(id: &str, tokens: &[&str], tags: &[&str], intents: &[&str]) -> UtteranceRecord {
        UtteranceRecord {
            session_id: "1".into(),
            utterance_id: id.into(),
            role: "usr".into(),
            tokens: tokens.iter().map(|s| s.to_string()).collect(),
            intents: intents.iter().map(|s| s.to_string()).collect(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            action: serde_json::Value::Null,
        }
    }

    fn examples(vocabs: &Vocabularies) -> (Vec<Example>, IntentWeights) {
        let records = vec![
            record("0", &["我", "要", "去", "北京"], &["O", "O", "O", "B-loc"], &["Inform"]),
            record("1", &["去", "上海"], &["O", "B-loc"], &["Inform", "General"]),
            record("2", &["北京", "要"], &["B-loc", "O"], &["Request"]),
        ];
        Featurizer::new(vocabs, 6)
            .unwrap()
            .featurize_all(records, Split::Train)
            .unwrap()
    }

    // lr 0 keeps every weight fixed, so validation scores are flat
    fn config(dir: &Path) -> TaskConfig {
        TaskConfig {
            encoder: EncoderKind::Embedding { hidden_size: 8 },
            model_save_path: dir.join("model"),
            output_path: dir.join("output"),
            max_len: 6,
            hidden_units: 4,
            train_batch_size: 2,
            lr: 0.0,
            warmup_steps: 1,
            ..TaskConfig::default()
        }
    }

    fn build(config: &TaskConfig, vocabs: &Vocabularies, varmap: &VarMap) -> TaskModel {
        build_model(config, vocabs, varmap, &Device::Cpu).unwrap()
    }

    fn slot_bias(varmap: &VarMap) -> Vec<f32> {
        let vars = varmap.data().lock().unwrap();
        vars[SLOT_BIAS].to_vec1().unwrap()
    }

    fn saved_slot_bias(config: &TaskConfig) -> Vec<f32> {
        let path = checkpoint::weights_path(&config.model_save_path);
        let tensors = candle_core::safetensors::load(path, &Device::Cpu).unwrap();
        tensors[SLOT_BIAS].to_vec1().unwrap()
    }

    /// Records metric names in emission order.
    struct Recorder<'r>(&'r RefCell<Vec<String>>);

    impl TrainingObserver for Recorder<'_> {
        fn on_metric(&mut self, _step: usize, name: &str, _value: f64) {
            self.0.borrow_mut().push(name.to_string());
        }
    }

    /// After the first validation, pins every emission to `O` so later
    /// epochs find no entities at all.
    struct PinOutside<'v> {
        varmap: &'v VarMap,
        validated: bool,
        pinned: bool,
    }

    impl TrainingObserver for PinOutside<'_> {
        fn on_metric(&mut self, _step: usize, name: &str, _value: f64) {
            match name {
                "slot_f1" => self.validated = true,
                "loss" if self.validated && !self.pinned => {
                    let vars = self.varmap.data().lock().unwrap();
                    let bias = Tensor::new(&[100f32, 0.0, 0.0], &Device::Cpu).unwrap();
                    vars[SLOT_BIAS].set(&bias).unwrap();
                    self.pinned = true;
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_flat_score_stops_after_patience() {
        let dir = tempfile::tempdir().unwrap();
        let config = TaskConfig {
            epochs: 6,
            patience: 1,
            ..config(dir.path())
        };
        let vocabs = vocabs();
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model = build(&config, &vocabs, &varmap);
        let (train, weights) = examples(&vocabs);

        let mut trainer = Trainer::new(&config, &model, &varmap, &vocabs, &device);
        let summary = trainer.train(&train, &weights, Some(&train)).unwrap();

        assert!(summary.stopped_early);
        assert_eq!(summary.epochs_run, 2);
        assert!(summary.epochs_run < config.epochs);
        // two batches per epoch
        assert_eq!(summary.global_step, 4);
        assert!(summary.best_score.is_some());
        assert!(checkpoint::weights_path(&config.model_save_path).is_file());
    }

    #[test]
    fn test_best_checkpoint_survives_worse_epochs() {
        let dir = tempfile::tempdir().unwrap();
        let config = TaskConfig {
            epochs: 3,
            patience: 3,
            ..config(dir.path())
        };
        let vocabs = vocabs();
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model = build(&config, &vocabs, &varmap);
        let (train, weights) = examples(&vocabs);
        let initial = slot_bias(&varmap);

        let pin = PinOutside {
            varmap: &varmap,
            validated: false,
            pinned: false,
        };
        let mut trainer = Trainer::new(&config, &model, &varmap, &vocabs, &device).with_observer(pin);
        let summary = trainer.train(&train, &weights, Some(&train)).unwrap();

        assert_eq!(summary.epochs_run, 3);
        assert!(!summary.stopped_early);
        assert_eq!(slot_bias(&varmap), vec![100.0, 0.0, 0.0]);
        // epochs 2 and 3 never beat epoch 1, whose weights stay on disk
        assert_eq!(saved_slot_bias(&config), initial);
    }

    #[test]
    fn test_step_failure_aborts_training() {
        let dir = tempfile::tempdir().unwrap();
        let config = TaskConfig {
            epochs: 3,
            ..config(dir.path())
        };
        let vocabs = vocabs();
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model = build(&config, &vocabs, &varmap);
        let (train, _) = examples(&vocabs);
        // one weight short of the intent vocabulary
        let weights = IntentWeights::new(2);

        let seen = RefCell::new(Vec::new());
        let mut trainer = Trainer::new(&config, &model, &varmap, &vocabs, &device)
            .with_observer(Recorder(&seen));
        let err = trainer.train(&train, &weights, Some(&train)).unwrap_err();

        assert!(format!("{err:#}").contains("step 1 failed"));
        assert_eq!(trainer.global_step(), 0);
        assert!(seen.borrow().is_empty());
        assert!(!checkpoint::weights_path(&config.model_save_path).exists());
    }

    #[test]
    fn test_shuffle_is_seeded_permutation() {
        let mut a: Vec<usize> = (0..50).collect();
        let mut b: Vec<usize> = (0..50).collect();
        shuffle(&mut a, &mut oorandom::Rand32::new(42));
        shuffle(&mut b, &mut oorandom::Rand32::new(42));
        assert_eq!(a, b);
        assert_ne!(a, (0..50).collect::<Vec<_>>());

        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
    }
}
