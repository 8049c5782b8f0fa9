//! Fully connected layer, dropout and the row-wise log-softmax head.

use ndarray::{Array1, Array2, ArrayD, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use rand::{rngs::StdRng, Rng};
use serde::{Deserialize, Serialize};

/// `y = x·W + b` applied to every row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    /// `(input, output)`
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(input: usize, output: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (input.max(1) as f32).sqrt();
        Self {
            weights: Array2::from_shape_fn((input, output), |_| rng.gen_range(-bound..bound)),
            bias: Array1::zeros(output),
        }
    }

    /// Check the weights against an `input`-wide feed. Returns the output width.
    pub fn check_shape(&self, input: usize) -> Result<usize, String> {
        if self.weights.nrows() != input {
            return Err(format!(
                "weights take {} inputs, fed {input}",
                self.weights.nrows()
            ));
        }
        if self.bias.len() != self.weights.ncols() {
            return Err(format!(
                "bias has {} entries for {} outputs",
                self.bias.len(),
                self.weights.ncols()
            ));
        }
        Ok(self.weights.ncols())
    }

    pub fn forward(&self, input: ArrayView2<'_, f32>) -> Array2<f32> {
        input.dot(&self.weights) + &self.bias
    }

    /// Returns `[dW, db]` and the input gradient.
    pub fn backward(
        &self,
        input: ArrayView2<'_, f32>,
        grad_output: ArrayView2<'_, f32>,
    ) -> (Vec<ArrayD<f32>>, Array2<f32>) {
        let d_weights = input.t().dot(&grad_output);
        let d_bias = grad_output.sum_axis(Axis(0));
        let d_input = grad_output.dot(&self.weights.t());
        (vec![d_weights.into_dyn(), d_bias.into_dyn()], d_input)
    }

    pub fn parameters(&self) -> [ArrayViewD<'_, f32>; 2] {
        [self.weights.view().into_dyn(), self.bias.view().into_dyn()]
    }

    pub fn parameters_mut(&mut self) -> [ArrayViewMutD<'_, f32>; 2] {
        [
            self.weights.view_mut().into_dyn(),
            self.bias.view_mut().into_dyn(),
        ]
    }
}

/// Inverted dropout. Inactive unless switched on by the trainer; the mode is
/// never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dropout {
    rate: f32,
    #[serde(skip)]
    active: bool,
}

impl Dropout {
    pub fn new(rate: f32) -> Self {
        Self {
            rate,
            active: false,
        }
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) -> bool {
        std::mem::replace(&mut self.active, active)
    }

    /// Scaled keep-mask for a `shape` activation, or `None` when dropout
    /// does nothing.
    pub fn mask(&self, shape: (usize, usize), rng: &mut StdRng) -> Option<Array2<f32>> {
        if !self.active || self.rate <= 0.0 {
            return None;
        }
        let keep = 1.0 - self.rate;
        Some(Array2::from_shape_fn(shape, |_| {
            if rng.gen::<f32>() < keep {
                1.0 / keep
            } else {
                0.0
            }
        }))
    }
}

/// Numerically stable row-wise log-softmax.
pub fn log_softmax(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
        let log_sum = row.iter().map(|&x| (x - max).exp()).sum::<f32>().ln() + max;
        row.mapv_inplace(|x| x - log_sum);
    }
    out
}

/// Gradient through [`log_softmax`]: `g - softmax * sum(g)` per row.
pub fn log_softmax_backward(log_probs: &Array2<f32>, grad_output: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut grad = grad_output.to_owned();
    for (mut g, lp) in grad.rows_mut().into_iter().zip(log_probs.rows()) {
        let total = g.sum();
        for (gi, &l) in g.iter_mut().zip(lp.iter()) {
            *gi -= l.exp() * total;
        }
    }
    grad
}
