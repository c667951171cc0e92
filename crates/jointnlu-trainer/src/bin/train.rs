use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use jointnlu_trainer::{run, TaskConfig};
use tracing_subscriber::EnvFilter;

/// CLI arguments
#[derive(Parser)]
#[command(name = "jointnlu-train")]
#[command(about = "Train, evaluate and run the joint intent/slot model")]
#[command(version)]
struct Cli {
    /// Task configuration (JSON)
    #[arg(short, long, env = "JOINTNLU_CONFIG")]
    config: PathBuf,

    /// Device: cpu, cuda, cuda:N, metal or auto
    #[arg(short, long, env = "JOINTNLU_DEVICE")]
    device: Option<String>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Number of training epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Enable or disable training
    #[arg(long, value_name = "BOOL")]
    do_train: Option<bool>,

    /// Enable or disable evaluation on the dev files
    #[arg(long, value_name = "BOOL")]
    do_eval: Option<bool>,

    /// Enable or disable inference on the test files
    #[arg(long, value_name = "BOOL")]
    do_infer: Option<bool>,
}

impl Cli {
    fn task_config(&self) -> Result<TaskConfig> {
        let mut config = TaskConfig::from_json_file(&self.config)?;
        if let Some(device) = &self.device {
            config = config.with_device(device.clone());
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if let Some(epochs) = self.epochs {
            config = config.with_epochs(epochs);
        }
        let (train, eval, infer) = (
            self.do_train.unwrap_or(config.do_train),
            self.do_eval.unwrap_or(config.do_eval),
            self.do_infer.unwrap_or(config.do_infer),
        );
        Ok(config.with_modes(train, eval, infer))
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = cli.task_config().and_then(|config| run(&config)) {
        eprintln!("Training failed: {e:#}");
        std::process::exit(1);
    }
}
