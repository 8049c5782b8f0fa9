//! Minibatch loop and the sub-batch worker pool.
//!
//! ## Iteration
//!
//! ```text
//! control thread                          workers (≤ concurrency)
//! ──────────────                          ───────────────────────
//! check running flag
//! take next minibatch (reshuffle at epoch end)
//! queue sub-batch indices ──► channel ──► forward + CTC + backward
//!                                          result → slot[index]
//! reduce slots in index order ◄───────────
//! average, Adam step
//! periodic validation (dropout off)
//! ```
//!
//! Workers only read the model. The single parameter update happens on the
//! control thread after every worker of the iteration has finished.

use std::ops::Range;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Instant;

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info, warn};

use super::{Adam, TrainConfig, TrainDiagnostics, TrainReport, TrainState};
use crate::ctc::CtcLattice;
use crate::dictionary::Dictionary;
use crate::error::{GraphoneError, Result};
use crate::model::{Gradients, InferenceMode, SeqFunc};

/// What one sub-batch hands back to the control thread.
struct SubBatch {
    cost: f64,
    grads: Gradients,
    samples: usize,
}

pub struct Trainer {
    config: TrainConfig,
    optimizer: Adam,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<TrainState>>,
    diagnostics: Arc<TrainDiagnostics>,
    rng: StdRng,
}

impl Trainer {
    /// `running` is the cooperative stop flag: the loop exits once it reads
    /// `false` between iterations.
    pub fn new(config: TrainConfig, running: Arc<AtomicBool>) -> Self {
        let mut config = config;
        config.normalize();
        Self {
            optimizer: Adam::new(config.step_size),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            running,
            state: Arc::new(Mutex::new(TrainState::Idle)),
            diagnostics: Arc::new(TrainDiagnostics::default()),
        }
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn state(&self) -> TrainState {
        *self.state.lock()
    }

    pub fn diagnostics(&self) -> Arc<TrainDiagnostics> {
        Arc::clone(&self.diagnostics)
    }

    pub(crate) fn set_state(&self, state: TrainState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            debug!("train state {previous:?} -> {state:?}");
        }
    }

    /// Train until the iteration cap or the stop flag.
    ///
    /// `training` is reordered in place by the per-epoch shuffle. Returns to
    /// [`TrainState::Idle`] on success; any sub-batch error aborts the run.
    pub fn run<M: SeqFunc>(
        &mut self,
        model: &mut M,
        training: &mut Dictionary,
        validation: Option<&Dictionary>,
    ) -> Result<TrainReport> {
        if training.is_empty() {
            return Err(GraphoneError::Config("training set is empty".into()));
        }
        let validation = validation.filter(|v| !v.is_empty() && self.config.validation_size > 0);

        let mut report = TrainReport::default();
        if let Some(v) = validation {
            report.initial_validation = Some(self.validate(model, v)?);
        }

        if self.config.reshuffle {
            training.shuffle(&mut self.rng);
        }
        let previous_dropout = model.set_dropout_active(true);
        self.set_state(TrainState::Training);
        info!(
            "training on {} samples (batch {}, sub-batch {}, workers {})",
            training.len(),
            self.config.batch_size,
            self.config.sub_batch_size,
            self.config.concurrency
        );

        let outcome = self.train_loop(model, training, validation, &mut report);
        model.set_dropout_active(previous_dropout);
        self.set_state(TrainState::Idle);
        outcome?;

        if let Some(v) = validation {
            report.final_validation = Some(self.validate(model, v)?);
            self.set_state(TrainState::Idle);
        }
        Ok(report)
    }

    fn train_loop<M: SeqFunc>(
        &mut self,
        model: &mut M,
        training: &mut Dictionary,
        validation: Option<&Dictionary>,
        report: &mut TrainReport,
    ) -> Result<()> {
        let mut cursor = 0usize;
        loop {
            if !self.running.load(Ordering::Relaxed) {
                info!("stop requested after {} iterations", report.iterations);
                report.interrupted = true;
                return Ok(());
            }
            if self
                .config
                .max_iterations
                .is_some_and(|cap| report.iterations >= cap)
            {
                return Ok(());
            }

            if cursor >= training.len() {
                cursor = 0;
                report.epochs += 1;
                debug!("epoch {} complete", report.epochs);
                if self.config.reshuffle {
                    training.shuffle(&mut self.rng);
                }
            }
            let end = (cursor + self.config.batch_size).min(training.len());
            let started = Instant::now();
            let cost = self.step(model, training, cursor..end)?;
            cursor = end;
            report.iterations += 1;
            report.last_cost = Some(cost);

            let iteration = report.iterations;
            let validation_cost = match validation {
                Some(v) if iteration % self.config.validation_interval == 0 => {
                    let c = self.validate(model, v)?;
                    self.set_state(TrainState::Training);
                    Some(c)
                }
                _ => None,
            };
            if iteration % self.config.log_interval == 0 {
                match validation_cost {
                    Some(v) => info!(
                        "iter={iteration} cost={cost:.4} validation={v:.4} elapsed_ms={}",
                        started.elapsed().as_millis()
                    ),
                    None => info!(
                        "iter={iteration} cost={cost:.4} elapsed_ms={}",
                        started.elapsed().as_millis()
                    ),
                }
            }
        }
    }

    /// One optimizer update over `training[range]`. Returns the mean cost.
    pub fn step<M: SeqFunc>(
        &mut self,
        model: &mut M,
        training: &Dictionary,
        range: Range<usize>,
    ) -> Result<f64> {
        let seed: u64 = self.rng.gen();
        let (cost, mut grads, samples) = self.gradient(model, training, range, seed)?;
        if samples == 0 {
            return Ok(0.0);
        }
        grads.scale(1.0 / samples as f32);
        self.optimizer.step(model, &grads)?;

        self.diagnostics.record_iteration(samples, cost / samples as f64);
        Ok(cost / samples as f64)
    }

    /// Summed cost and gradient over `range`, computed by the worker pool.
    fn gradient<M: SeqFunc>(
        &self,
        model: &M,
        data: &Dictionary,
        range: Range<usize>,
        seed: u64,
    ) -> Result<(f64, Gradients, usize)> {
        let jobs: Vec<Range<usize>> = range
            .clone()
            .step_by(self.config.sub_batch_size)
            .map(|start| start..(start + self.config.sub_batch_size).min(range.end))
            .collect();
        let slots: Vec<Mutex<Option<Result<SubBatch>>>> =
            jobs.iter().map(|_| Mutex::new(None)).collect();
        let failed = AtomicBool::new(false);

        let (tx, rx) = crossbeam_channel::unbounded::<usize>();
        for index in 0..jobs.len() {
            if tx.send(index).is_err() {
                break;
            }
        }
        drop(tx);

        let workers = self.config.concurrency.min(jobs.len()).max(1);
        std::thread::scope(|scope| {
            for _ in 0..workers {
                let rx = rx.clone();
                let (jobs, slots, failed) = (&jobs, &slots, &failed);
                scope.spawn(move || {
                    let mut lattice = CtcLattice::new();
                    for index in rx.iter() {
                        if failed.load(Ordering::Relaxed) {
                            break;
                        }
                        let mut rng = StdRng::seed_from_u64(sub_batch_seed(seed, index));
                        let result =
                            sub_batch(model, data, jobs[index].clone(), &mut lattice, &mut rng);
                        if result.is_err() {
                            failed.store(true, Ordering::Relaxed);
                        }
                        *slots[index].lock() = Some(result);
                    }
                });
            }
        });

        let mut total = Gradients::zeros_like(model);
        let mut cost = 0.0;
        let mut samples = 0;
        for (index, slot) in slots.into_iter().enumerate() {
            match slot.into_inner() {
                Some(Ok(part)) => {
                    total.add_assign(&part.grads);
                    cost += part.cost;
                    samples += part.samples;
                    self.diagnostics.record_sub_batch();
                }
                Some(Err(e)) => {
                    warn!("sub-batch {index} failed: {e}");
                    return Err(e);
                }
                // Skipped after another sub-batch failed.
                None => {}
            }
        }
        Ok((cost, total, samples))
    }

    /// Mean cost over a shuffled sample of `validation`, dropout off.
    pub fn validate<M: SeqFunc>(&mut self, model: &mut M, validation: &Dictionary) -> Result<f64> {
        self.set_state(TrainState::Validating);
        let mut pool = validation.clone();
        pool.shuffle(&mut self.rng);
        let count = self.config.validation_size.min(pool.len());
        let chosen = pool.slice(0, count);

        let guard = InferenceMode::enter(model);
        let samples = (0..chosen.len())
            .map(|i| chosen.sample(i))
            .collect::<Result<Vec<_>>>()?;
        let inputs: Vec<_> = samples.iter().map(|s| s.input.clone()).collect();
        let emissions = guard.apply(&inputs);

        let mut lattice = CtcLattice::new();
        let mut total = 0.0;
        for (emission, sample) in emissions.iter().zip(&samples) {
            total += lattice.cost(emission.view(), &sample.target)?;
        }
        drop(guard);

        self.diagnostics.record_validation();
        Ok(if count == 0 { 0.0 } else { total / count as f64 })
    }
}

fn sub_batch_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

fn sub_batch<M: SeqFunc>(
    model: &M,
    data: &Dictionary,
    range: Range<usize>,
    lattice: &mut CtcLattice,
    rng: &mut StdRng,
) -> Result<SubBatch> {
    let mut grads = Gradients::zeros_like(model);
    let mut cost = 0.0;
    let samples = range.len();
    for i in range {
        let sample = data.sample(i)?;
        let (emission, tape) = model.forward(sample.input.view(), rng);
        let (c, d_emission) = lattice.cost_and_grad(emission.view(), &sample.target)?;
        let (g, _) = model.backward(&tape, d_emission.view());
        grads.add_assign(&g);
        cost += c;
    }
    Ok(SubBatch {
        cost,
        grads,
        samples,
    })
}
