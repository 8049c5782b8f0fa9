//! Training: configuration, optimizer, the minibatch loop and a
//! checkpoint-to-checkpoint session helper.

pub mod adam;
pub mod trainer;

pub use adam::Adam;
pub use trainer::Trainer;

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dictionary::{Dictionary, Task};
use crate::error::{GraphoneError, Result};
use crate::model::ModelConfig;
use crate::network::Network;

/// Optimisation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Adam step size.
    pub step_size: f32,
    /// Samples per optimizer update.
    pub batch_size: usize,
    /// Samples per worker job.
    pub sub_batch_size: usize,
    /// Worker threads computing sub-batches.
    pub concurrency: usize,
    /// Held-out samples drawn per validation (0 disables validation).
    pub validation_size: usize,
    /// Validate every N iterations.
    pub validation_interval: usize,
    /// Share of distinct spellings routed to validation by the hash split.
    pub validation_fraction: f64,
    /// Log every N iterations.
    pub log_interval: usize,
    /// Stop after this many iterations; `None` runs until interrupted.
    pub max_iterations: Option<usize>,
    /// Reshuffle the training set at the start of every epoch.
    pub reshuffle: bool,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            step_size: 0.001,
            batch_size: 128,
            sub_batch_size: 16,
            concurrency: 2,
            validation_size: 128,
            validation_interval: 1,
            validation_fraction: 0.1,
            log_interval: 1,
            max_iterations: None,
            reshuffle: true,
            seed: 0,
        }
    }
}

impl TrainConfig {
    pub fn normalize(&mut self) {
        self.step_size = if self.step_size.is_finite() && self.step_size > 0.0 {
            self.step_size.min(1.0)
        } else {
            0.001
        };
        self.batch_size = self.batch_size.clamp(1, 1 << 16);
        self.sub_batch_size = self.sub_batch_size.clamp(1, self.batch_size);
        self.concurrency = self.concurrency.clamp(1, 64);
        self.validation_interval = self.validation_interval.max(1);
        self.validation_fraction = if self.validation_fraction.is_finite() {
            self.validation_fraction.clamp(0.0, 1.0)
        } else {
            0.1
        };
        self.log_interval = self.log_interval.max(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainState {
    Idle,
    Training,
    Validating,
    Saving,
}

/// Lock-free counters readable while training runs.
#[derive(Default)]
pub struct TrainDiagnostics {
    pub iterations: AtomicUsize,
    pub samples: AtomicUsize,
    pub sub_batches: AtomicUsize,
    pub validations: AtomicUsize,
    /// `f64::to_bits` of the latest mean training cost.
    last_cost: AtomicU64,
}

impl TrainDiagnostics {
    pub(crate) fn record_iteration(&self, samples: usize, cost: f64) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        self.samples.fetch_add(samples, Ordering::Relaxed);
        self.last_cost.store(cost.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn record_sub_batch(&self) {
        self.sub_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_validation(&self) {
        self.validations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.iterations.store(0, Ordering::Relaxed);
        self.samples.store(0, Ordering::Relaxed);
        self.sub_batches.store(0, Ordering::Relaxed);
        self.validations.store(0, Ordering::Relaxed);
        self.last_cost.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TrainSnapshot {
        TrainSnapshot {
            iterations: self.iterations.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            sub_batches: self.sub_batches.load(Ordering::Relaxed),
            validations: self.validations.load(Ordering::Relaxed),
            last_cost: f64::from_bits(self.last_cost.load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainSnapshot {
    pub iterations: usize,
    pub samples: usize,
    pub sub_batches: usize,
    pub validations: usize,
    pub last_cost: f64,
}

/// Outcome of one [`Trainer::run`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainReport {
    pub iterations: usize,
    /// Completed passes over the training set.
    pub epochs: usize,
    /// Mean cost of the last minibatch.
    pub last_cost: Option<f64>,
    pub initial_validation: Option<f64>,
    pub final_validation: Option<f64>,
    /// Whether the stop flag ended the run.
    pub interrupted: bool,
}

/// Load (or create) the network at `checkpoint`, train the sub-model for
/// `task` on the hash-split training part of `dictionary`, then save.
///
/// The checkpoint is written even when the run was interrupted; a failed run
/// leaves the previous checkpoint untouched.
pub fn train_network(
    checkpoint: &Path,
    dictionary: &Dictionary,
    task: Task,
    model_config: &ModelConfig,
    config: &TrainConfig,
    running: Arc<AtomicBool>,
) -> Result<(Network, TrainReport)> {
    let mut trainer = Trainer::new(config.clone(), running);
    train_with(&mut trainer, checkpoint, dictionary, task, model_config)
}

/// [`train_network`] with a caller-owned trainer, so its state and
/// diagnostics can be observed from another thread.
pub fn train_with(
    trainer: &mut Trainer,
    checkpoint: &Path,
    dictionary: &Dictionary,
    task: Task,
    model_config: &ModelConfig,
) -> Result<(Network, TrainReport)> {
    let mut network = Network::load_or_new(checkpoint, model_config)?;

    let data = dictionary
        .clone()
        .with_task(task)
        .with_spacing(network.spacing());
    let (validation, mut training) = data.hash_split(trainer.config().validation_fraction);
    info!(
        "loaded {} training and {} validation samples",
        training.len(),
        validation.len()
    );
    if training.is_empty() {
        return Err(GraphoneError::Config(
            "hash split left no training samples".into(),
        ));
    }

    let report = trainer.run(network.model_mut(task), &mut training, Some(&validation))?;

    trainer.set_state(TrainState::Saving);
    let saved = network.save(checkpoint);
    trainer.set_state(TrainState::Idle);
    saved?;
    info!(
        "training finished: {} iterations, last cost {:?}",
        report.iterations, report.last_cost
    );
    Ok((network, report))
}
