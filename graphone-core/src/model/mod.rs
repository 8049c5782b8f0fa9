//! Trainable sequence functions.
//!
//! `SeqFunc` is the seam between the training loop and any network that maps
//! a `(frames, width)` matrix to a `(frames, outputs)` matrix. Two variants
//! exist: [`LstmStack`] (one reading direction) and [`Bidir`] (two stacks
//! plus a mixer ending in a log-softmax over labels + blank).
//!
//! Parameters are exposed as a flat, stably ordered list of tensor views;
//! [`Gradients`] uses the same order so the optimizer can zip the two.

pub mod bidir;
pub mod dense;
pub mod lstm;

pub use bidir::Bidir;
pub use dense::{Dense, Dropout};
pub use lstm::{LstmLayer, LstmStack};

use std::ops::Deref;

use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD, ArrayViewMutD};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::frames::DEFAULT_SPACING;

/// Contract for every trainable sequence model.
pub trait SeqFunc: Send + Sync {
    /// Intermediate values `forward` keeps for `backward`.
    type Tape: Send;

    /// Deterministic inference over a batch of independent sequences.
    /// Stochastic layers are always bypassed here.
    fn apply(&self, batch: &[Array2<f32>]) -> Vec<Array2<f32>>;

    /// Single-sequence forward pass that records a tape. Dropout is applied
    /// only while the model's dropout mode is active.
    fn forward(&self, input: ArrayView2<'_, f32>, rng: &mut StdRng) -> (Array2<f32>, Self::Tape);

    /// Back-propagate `grad_output` (d loss / d output). Returns parameter
    /// gradients in `parameters()` order and the gradient w.r.t. the input.
    fn backward(&self, tape: &Self::Tape, grad_output: ArrayView2<'_, f32>)
        -> (Gradients, Array2<f32>);

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>>;

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>>;

    /// Toggle stochastic regularisation. Returns the previous mode.
    fn set_dropout_active(&mut self, _active: bool) -> bool {
        false
    }
}

/// Gradient tensors, one per parameter tensor, in `parameters()` order.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients(Vec<ArrayD<f32>>);

impl Gradients {
    pub fn new(tensors: Vec<ArrayD<f32>>) -> Self {
        Self(tensors)
    }

    pub fn zeros_like<M: SeqFunc + ?Sized>(model: &M) -> Self {
        Self(
            model
                .parameters()
                .iter()
                .map(|p| ArrayD::zeros(p.raw_dim()))
                .collect(),
        )
    }

    /// Concatenate gradient lists (e.g. sub-network by sub-network).
    pub fn chain(parts: impl IntoIterator<Item = Gradients>) -> Self {
        Self(parts.into_iter().flat_map(|g| g.0).collect())
    }

    /// Element-wise `self += other`.
    ///
    /// # Panics
    /// Panics if the two lists do not describe the same parameters.
    pub fn add_assign(&mut self, other: &Gradients) {
        assert_eq!(self.0.len(), other.0.len(), "gradient lists differ in length");
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a += b;
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for t in &mut self.0 {
            t.mapv_inplace(|x| x * factor);
        }
    }

    pub fn tensors(&self) -> &[ArrayD<f32>] {
        &self.0
    }
}

/// Shape and regularisation of one bidirectional model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// LSTM width in each direction.
    pub hidden_size: usize,
    /// Stacked LSTM layers per direction.
    pub layers: usize,
    /// Width both directions are projected to before summing.
    pub mixer_size: usize,
    /// Dropout rate on the summed projection (0 disables).
    pub dropout: f32,
    /// Multiplier on the first layer's input weights. One-hot inputs are
    /// sparse, so they get larger initial weights than recurrent inputs.
    pub input_scale: f32,
    /// Continuation frames per input symbol.
    pub spacing: usize,
    /// Seed for weight initialisation.
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_size: 0x80,
            layers: 2,
            mixer_size: 0x80,
            dropout: 0.0,
            input_scale: 16.0,
            spacing: DEFAULT_SPACING,
            seed: 0,
        }
    }
}

impl ModelConfig {
    pub fn normalize(&mut self) {
        self.hidden_size = self.hidden_size.clamp(1, 4096);
        self.layers = self.layers.clamp(1, 8);
        self.mixer_size = self.mixer_size.clamp(1, 4096);
        self.dropout = if self.dropout.is_finite() {
            self.dropout.clamp(0.0, 0.9)
        } else {
            0.0
        };
        self.input_scale = if self.input_scale.is_finite() && self.input_scale > 0.0 {
            self.input_scale.min(64.0)
        } else {
            1.0
        };
        self.spacing = self.spacing.min(32);
    }
}

/// Scoped deterministic mode: dropout is off while the guard lives and
/// restored to its previous state on drop.
pub struct InferenceMode<'a, M: SeqFunc> {
    model: &'a mut M,
    previous: bool,
}

impl<'a, M: SeqFunc> InferenceMode<'a, M> {
    pub fn enter(model: &'a mut M) -> Self {
        let previous = model.set_dropout_active(false);
        Self { model, previous }
    }
}

impl<M: SeqFunc> Deref for InferenceMode<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        &*self.model
    }
}

impl<M: SeqFunc> Drop for InferenceMode<'_, M> {
    fn drop(&mut self) {
        self.model.set_dropout_active(self.previous);
    }
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
