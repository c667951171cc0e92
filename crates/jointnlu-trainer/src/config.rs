//! Task configuration: every knob of a train/eval/infer run, validated once
//! before any work starts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use candle_core::Device;
use jointnlu_core::eval::DEFAULT_INTENT_THRESHOLD;
use jointnlu_core::{HeadConfig, IntentWeighting, LossWeights};
use serde::{Deserialize, Serialize};

/// Which encoder sits under the two heads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncoderKind {
    /// BERT built from `model_config_path`, optionally initialised from
    /// `bert_model_path`.
    #[default]
    Bert,
    /// Trainable token + position embeddings.
    Embedding { hidden_size: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub seed: u64,
    /// `cpu`, `cuda`, `cuda:N`, `metal` or `auto`.
    pub device: String,

    pub train_batch_size: usize,
    pub eval_batch_size: usize,
    pub epochs: usize,
    pub lr: f64,
    pub warmup_steps: usize,
    /// Log the average loss every this many steps.
    #[serde(alias = "nlog")]
    pub log_steps: usize,
    /// Mid-epoch validation interval; 0 disables it.
    #[serde(alias = "neval")]
    pub eval_steps: usize,
    pub early_stop: bool,
    pub patience: usize,

    pub max_len: usize,
    pub hidden_units: usize,
    pub dropout: f32,
    pub constrained_decoding: bool,
    pub intent_threshold: f32,
    pub loss_weights: LossWeights,
    pub intent_weighting: IntentWeighting,
    /// Number of shards each batch is split into per step.
    pub shards: usize,

    pub do_train: bool,
    pub do_eval: bool,
    pub do_infer: bool,

    pub encoder: EncoderKind,
    pub train_data_path: PathBuf,
    #[serde(alias = "dev_data_path")]
    pub dev_data_paths: Vec<PathBuf>,
    #[serde(alias = "test_data_path")]
    pub test_data_paths: Vec<PathBuf>,
    pub bert_model_path: Option<PathBuf>,
    pub model_config_path: Option<PathBuf>,
    pub vocab_path: PathBuf,
    pub slot_vocab_path: PathBuf,
    pub intent_vocab_path: PathBuf,
    pub model_save_path: PathBuf,
    pub output_path: PathBuf,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            device: "cpu".into(),
            train_batch_size: 32,
            eval_batch_size: 32,
            epochs: 5,
            lr: 5e-5,
            warmup_steps: 1000,
            log_steps: 100,
            eval_steps: 0,
            early_stop: true,
            patience: 3,
            max_len: 128,
            hidden_units: 128,
            dropout: 0.5,
            constrained_decoding: false,
            intent_threshold: DEFAULT_INTENT_THRESHOLD,
            loss_weights: LossWeights::default(),
            intent_weighting: IntentWeighting::Counts,
            shards: 1,
            do_train: true,
            do_eval: true,
            do_infer: false,
            encoder: EncoderKind::Bert,
            train_data_path: PathBuf::from("data/crosswoz/nlu/train_nlu.json"),
            dev_data_paths: vec![
                PathBuf::from("data/crosswoz/nlu/val_nlu.json"),
                PathBuf::from("data/crosswoz/nlu/test_nlu.json"),
            ],
            test_data_paths: vec![PathBuf::from("data/crosswoz/nlu/test_nlu.json")],
            bert_model_path: None,
            model_config_path: None,
            vocab_path: PathBuf::from("pretrained/vocab.txt"),
            slot_vocab_path: PathBuf::from("data/crosswoz/nlu/slots_vocab.txt"),
            intent_vocab_path: PathBuf::from("data/crosswoz/nlu/intents_vocab.txt"),
            model_save_path: PathBuf::from("model_save/crosswoz_nlu_model"),
            output_path: PathBuf::from("output/crosswoz_nlu_model"),
        }
    }
}

impl TaskConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON config; absent fields keep their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set the train / eval / infer mode flags.
    pub fn with_modes(mut self, train: bool, eval: bool, infer: bool) -> Self {
        self.do_train = train;
        self.do_eval = eval;
        self.do_infer = infer;
        self
    }

    pub fn with_encoder(mut self, encoder: EncoderKind) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_output_dirs(mut self, model_save_path: PathBuf, output_path: PathBuf) -> Self {
        self.model_save_path = model_save_path;
        self.output_path = output_path;
        self
    }

    pub fn head_config(&self) -> HeadConfig {
        HeadConfig {
            hidden_units: self.hidden_units,
            dropout: self.dropout,
            constrained_decoding: self.constrained_decoding,
        }
    }

    pub fn device(&self) -> Result<Device> {
        let name = self.device.trim().to_ascii_lowercase();
        let device = match name.as_str() {
            "cpu" => Device::Cpu,
            "auto" => Device::cuda_if_available(0)?,
            "metal" => Device::new_metal(0)?,
            "cuda" => Device::new_cuda(0)?,
            other => match other.strip_prefix("cuda:").map(str::parse::<usize>) {
                Some(Ok(ordinal)) => Device::new_cuda(ordinal)?,
                _ => bail!("unknown device '{}'", self.device),
            },
        };
        Ok(device)
    }

    /// Check values and the files the enabled modes will read.
    pub fn validate(&self) -> Result<()> {
        if !(self.do_train || self.do_eval || self.do_infer) {
            bail!("nothing to do: do_train, do_eval and do_infer are all off");
        }
        if self.max_len < 3 {
            bail!("max_len must be at least 3, got {}", self.max_len);
        }
        if self.train_batch_size == 0 || self.eval_batch_size == 0 {
            bail!("batch sizes must be positive");
        }
        if self.hidden_units == 0 {
            bail!("hidden_units must be positive");
        }
        if !(0.0..1.0).contains(&self.dropout) {
            bail!("dropout must lie in [0, 1), got {}", self.dropout);
        }
        if !(self.intent_threshold > 0.0 && self.intent_threshold < 1.0) {
            bail!(
                "intent_threshold must lie in (0, 1), got {}",
                self.intent_threshold
            );
        }
        if self.log_steps == 0 {
            bail!("log_steps must be positive");
        }
        if self.shards == 0 {
            bail!("shards must be at least 1");
        }
        if self.do_train && (self.epochs == 0 || self.lr <= 0.0) {
            bail!("training needs epochs > 0 and lr > 0");
        }
        if let EncoderKind::Embedding { hidden_size: 0 } = self.encoder {
            bail!("embedding encoder hidden_size must be positive");
        }

        require_file(&self.vocab_path, "vocab_path")?;
        require_file(&self.slot_vocab_path, "slot_vocab_path")?;
        require_file(&self.intent_vocab_path, "intent_vocab_path")?;
        if self.encoder == EncoderKind::Bert {
            match &self.model_config_path {
                Some(path) => require_file(path, "model_config_path")?,
                None => bail!("the bert encoder needs model_config_path"),
            }
        }
        if let Some(path) = &self.bert_model_path {
            require_file(path, "bert_model_path")?;
        }
        if self.do_train {
            require_file(&self.train_data_path, "train_data_path")?;
        }
        if self.do_eval {
            if self.dev_data_paths.is_empty() {
                bail!("do_eval needs at least one dev_data_paths entry");
            }
            for path in &self.dev_data_paths {
                require_file(path, "dev_data_paths")?;
            }
        }
        if self.do_infer {
            if self.test_data_paths.is_empty() {
                bail!("do_infer needs at least one test_data_paths entry");
            }
            for path in &self.test_data_paths {
                require_file(path, "test_data_paths")?;
            }
        }
        Ok(())
    }
}

fn require_file(path: &Path, field: &str) -> Result<()> {
    if !path.is_file() {
        bail!("{field}: file not found: {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "x\n").unwrap();
        path
    }

    fn valid_config(dir: &Path) -> TaskConfig {
        TaskConfig {
            vocab_path: touch(dir, "vocab.txt"),
            slot_vocab_path: touch(dir, "slots.txt"),
            intent_vocab_path: touch(dir, "intents.txt"),
            train_data_path: touch(dir, "train.json"),
            dev_data_paths: vec![touch(dir, "dev.json")],
            test_data_paths: vec![touch(dir, "test.json")],
            encoder: EncoderKind::Embedding { hidden_size: 16 },
            ..TaskConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = TaskConfig::default();
        assert_eq!(config.seed, 42);
        assert_eq!(config.train_batch_size, 32);
        assert_eq!(config.epochs, 5);
        assert_eq!(config.max_len, 128);
        assert_eq!(config.warmup_steps, 1000);
        assert!((config.intent_threshold - 0.8).abs() < f32::EPSILON);
        assert!(config.early_stop);
        assert_eq!(config.loss_weights, LossWeights::default());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.json");
        fs::write(
            &path,
            r#"{"epochs": 2, "nlog": 10, "dev_data_path": ["a.json"], "encoder": {"kind": "embedding", "hidden_size": 32}}"#,
        )
        .unwrap();

        let config = TaskConfig::from_json_file(&path).unwrap();
        assert_eq!(config.epochs, 2);
        assert_eq!(config.log_steps, 10);
        assert_eq!(config.dev_data_paths, vec![PathBuf::from("a.json")]);
        assert_eq!(config.encoder, EncoderKind::Embedding { hidden_size: 32 });
        assert_eq!(config.lr, 5e-5);
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        let dir = tempfile::tempdir().unwrap();
        valid_config(dir.path()).validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let base = valid_config(dir.path());

        let cases = [
            TaskConfig {
                max_len: 2,
                ..base.clone()
            },
            TaskConfig {
                dropout: 1.0,
                ..base.clone()
            },
            TaskConfig {
                intent_threshold: 1.0,
                ..base.clone()
            },
            TaskConfig {
                train_batch_size: 0,
                ..base.clone()
            },
            TaskConfig {
                shards: 0,
                ..base.clone()
            },
            TaskConfig {
                train_data_path: dir.path().join("missing.json"),
                ..base.clone()
            },
            TaskConfig {
                encoder: EncoderKind::Bert,
                ..base.clone()
            },
            base.clone().with_modes(false, false, false),
        ];
        for config in cases {
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_mode_flags_limit_file_checks() {
        let dir = tempfile::tempdir().unwrap();
        let config = TaskConfig {
            train_data_path: dir.path().join("missing.json"),
            ..valid_config(dir.path())
        }
        .with_modes(false, true, false);
        config.validate().unwrap();
    }

    #[test]
    fn test_device_parsing() {
        assert!(TaskConfig::default().device().unwrap().is_cpu());
        assert!(TaskConfig::default().with_device("tpu").device().is_err());
    }
}
