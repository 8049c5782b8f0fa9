//! Connectionist Temporal Classification.
//!
//! ## Lattice
//!
//! For a target `l_1 .. l_L` the lattice has `S = 2L + 1` positions:
//!
//! ```text
//! s:      0      1     2      3     ...   2L-1   2L
//! label:  blank  l_1   blank  l_2   ...   l_L    blank
//! ```
//!
//! `alpha[t][s]` is the log-mass of all prefixes ending at `s` after frame
//! `t` (emission at `t` included); `beta[t][s]` is the log-mass of all
//! suffixes leaving `s` after frame `t` (emission at `t` excluded). Both
//! live in log space, in `f64`, in buffers that a [`CtcLattice`] reuses
//! across calls.

pub mod decode;

pub use decode::{best_path, Decoder, PrefixSearch};

use ndarray::{Array2, ArrayView2};

use crate::error::{GraphoneError, Result};

const NEG_INF: f64 = f64::NEG_INFINITY;

/// `ln(e^a + e^b)` without overflow.
pub(crate) fn log_add(a: f64, b: f64) -> f64 {
    if a == NEG_INF {
        return b;
    }
    if b == NEG_INF {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Fewest frames that can carry `target`: one per label plus a blank
/// between each pair of equal neighbours.
pub fn min_frames(target: &[usize]) -> usize {
    target.len() + target.windows(2).filter(|w| w[0] == w[1]).count()
}

/// Reusable forward-backward buffers.
#[derive(Debug, Default)]
pub struct CtcLattice {
    alpha: Array2<f64>,
    beta: Array2<f64>,
    labels: Vec<usize>,
}

impl CtcLattice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Negative log-likelihood of `target` under `emission`.
    ///
    /// `emission` is `(frames, A + 1)` log-probabilities with the blank in
    /// the last column.
    ///
    /// # Errors
    /// - [`GraphoneError::UnalignableSequence`] if there are fewer frames
    ///   than [`min_frames`] of the target.
    /// - [`GraphoneError::Config`] if a target label is not below the blank.
    pub fn cost(&mut self, emission: ArrayView2<'_, f32>, target: &[usize]) -> Result<f64> {
        self.prepare(emission, target)?;
        Ok(-self.run_forward(emission))
    }

    /// Cost plus its gradient w.r.t. every emission entry.
    ///
    /// # Errors
    /// Same as [`CtcLattice::cost`].
    pub fn cost_and_grad(
        &mut self,
        emission: ArrayView2<'_, f32>,
        target: &[usize],
    ) -> Result<(f64, Array2<f32>)> {
        self.prepare(emission, target)?;
        let log_z = self.run_forward(emission);
        let mut grad = Array2::<f32>::zeros(emission.dim());
        if !log_z.is_finite() {
            return Ok((-log_z, grad));
        }
        self.run_backward(emission);

        let (steps, positions) = self.alpha.dim();
        for t in 0..steps {
            for s in 0..positions {
                let occupancy = self.alpha[[t, s]] + self.beta[[t, s]] - log_z;
                if occupancy > NEG_INF {
                    grad[[t, self.labels[s]]] -= occupancy.exp() as f32;
                }
            }
        }
        Ok((-log_z, grad))
    }

    fn prepare(&mut self, emission: ArrayView2<'_, f32>, target: &[usize]) -> Result<()> {
        let steps = emission.nrows();
        let blank = emission.ncols().checked_sub(1).ok_or_else(|| {
            GraphoneError::Config("emission has no columns".into())
        })?;
        if let Some(&bad) = target.iter().find(|&&l| l >= blank) {
            return Err(GraphoneError::Config(format!(
                "target label {bad} does not fit an emission of width {}",
                blank + 1
            )));
        }
        let required = min_frames(target);
        if steps < required {
            return Err(GraphoneError::UnalignableSequence {
                frames: steps,
                required,
            });
        }

        self.labels.clear();
        self.labels.push(blank);
        for &l in target {
            self.labels.push(l);
            self.labels.push(blank);
        }

        let shape = (steps, self.labels.len());
        if self.alpha.dim() == shape {
            self.alpha.fill(NEG_INF);
            self.beta.fill(NEG_INF);
        } else {
            self.alpha = Array2::from_elem(shape, NEG_INF);
            self.beta = Array2::from_elem(shape, NEG_INF);
        }
        Ok(())
    }

    /// Whether the lattice allows skipping the blank between `s - 2` and `s`.
    fn can_skip(&self, s: usize) -> bool {
        let blank = self.labels[0];
        s >= 2 && self.labels[s] != blank && self.labels[s] != self.labels[s - 2]
    }

    /// Fills `alpha` and returns `log p(target | emission)`.
    fn run_forward(&mut self, emission: ArrayView2<'_, f32>) -> f64 {
        let (steps, positions) = self.alpha.dim();
        if steps == 0 {
            // Only the empty target survives `prepare` here.
            return 0.0;
        }
        let y = |t: usize, l: usize| f64::from(emission[[t, l]]);

        self.alpha[[0, 0]] = y(0, self.labels[0]);
        if positions > 1 {
            self.alpha[[0, 1]] = y(0, self.labels[1]);
        }
        for t in 1..steps {
            for s in 0..positions {
                let mut acc = self.alpha[[t - 1, s]];
                if s >= 1 {
                    acc = log_add(acc, self.alpha[[t - 1, s - 1]]);
                }
                if self.can_skip(s) {
                    acc = log_add(acc, self.alpha[[t - 1, s - 2]]);
                }
                self.alpha[[t, s]] = acc + y(t, self.labels[s]);
            }
        }

        let last = steps - 1;
        if positions > 1 {
            log_add(
                self.alpha[[last, positions - 1]],
                self.alpha[[last, positions - 2]],
            )
        } else {
            self.alpha[[last, 0]]
        }
    }

    fn run_backward(&mut self, emission: ArrayView2<'_, f32>) {
        let (steps, positions) = self.beta.dim();
        if steps == 0 {
            return;
        }
        let y = |t: usize, l: usize| f64::from(emission[[t, l]]);

        let last = steps - 1;
        self.beta[[last, positions - 1]] = 0.0;
        if positions > 1 {
            self.beta[[last, positions - 2]] = 0.0;
        }
        for t in (0..last).rev() {
            for s in 0..positions {
                let mut acc = self.beta[[t + 1, s]] + y(t + 1, self.labels[s]);
                if s + 1 < positions {
                    acc = log_add(acc, self.beta[[t + 1, s + 1]] + y(t + 1, self.labels[s + 1]));
                }
                if s + 2 < positions && self.can_skip(s + 2) {
                    acc = log_add(acc, self.beta[[t + 1, s + 2]] + y(t + 1, self.labels[s + 2]));
                }
                self.beta[[t, s]] = acc;
            }
        }
    }
}

/// One-shot [`CtcLattice::cost`].
pub fn cost(emission: ArrayView2<'_, f32>, target: &[usize]) -> Result<f64> {
    CtcLattice::new().cost(emission, target)
}
