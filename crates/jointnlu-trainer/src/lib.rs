//! # JointNLU Trainer
//!
//! Everything around the joint model that turns it into a runnable task:
//! configuration, the training loop with warmup and early stopping,
//! checkpoints, observers, and the `run` entry point that chains the
//! train, eval and infer modes.

pub mod checkpoint;
pub mod config;
pub mod early_stop;
pub mod model;
pub mod observer;
pub mod run;
pub mod schedule;
pub mod strategy;
pub mod trainer;

pub use config::{EncoderKind, TaskConfig};
pub use early_stop::{EarlyStopping, StopDecision};
pub use model::{build_model, TaskEncoder, TaskModel};
pub use observer::{LossHistory, TracingObserver, TrainingObserver};
pub use run::{run, RunSummary};
pub use schedule::LinearWarmup;
pub use strategy::ReplicaStrategy;
pub use trainer::{TrainSummary, Trainer};
