//! Bidirectional LSTM with an additive mixer.
//!
//! ```text
//! frames ──► forward stack ──────────────► Dense ─┐
//!    │                                            + ─► dropout ─► Dense ─► log-softmax
//!    └─► reverse ─► backward stack ─► reverse ► Dense ─┘
//! ```
//!
//! Each sequence is processed on its own, so sequences of different lengths
//! in a batch never interact.

use ndarray::{s, Array2, ArrayView2, ArrayViewD, ArrayViewMutD};
use rand::{rngs::StdRng, Rng};
use serde::{Deserialize, Serialize};

use super::dense::{log_softmax, log_softmax_backward};
use super::lstm::LstmTape;
use super::{Dense, Dropout, Gradients, LstmStack, ModelConfig, SeqFunc};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Mixer {
    in_forward: Dense,
    in_backward: Dense,
    dropout: Dropout,
    out: Dense,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bidir {
    forward: LstmStack,
    backward: LstmStack,
    mixer: Mixer,
}

pub struct BidirTape {
    forward: Vec<LstmTape>,
    backward: Vec<LstmTape>,
    forward_out: Array2<f32>,
    /// Backward stack output, re-reversed into input time order.
    backward_out: Array2<f32>,
    /// Mixer sum after dropout (input to the output layer).
    mixed: Array2<f32>,
    mask: Option<Array2<f32>>,
    log_probs: Array2<f32>,
}

impl Bidir {
    /// `input_width` frame coordinates in, `label_count + 1` log-probabilities
    /// out (the last one is the CTC blank).
    pub fn new<R: Rng + ?Sized>(
        input_width: usize,
        label_count: usize,
        config: &ModelConfig,
        rng: &mut R,
    ) -> Self {
        let h = config.hidden_size;
        let stack = |rng: &mut R| {
            LstmStack::new(input_width, h, config.layers, config.input_scale, rng)
        };
        let forward = stack(rng);
        let backward = stack(rng);
        let mixer = Mixer {
            in_forward: Dense::new(h, config.mixer_size, rng),
            in_backward: Dense::new(h, config.mixer_size, rng),
            dropout: Dropout::new(config.dropout),
            out: Dense::new(config.mixer_size, label_count + 1, rng),
        };
        Self {
            forward,
            backward,
            mixer,
        }
    }

    /// Check every tensor along the chain from `input_width` frame
    /// coordinates to `output_width` log-probabilities.
    pub fn check_shape(&self, input_width: usize, output_width: usize) -> Result<(), String> {
        let forward = self
            .forward
            .check_shape(input_width)
            .map_err(|e| format!("forward stack: {e}"))?;
        let backward = self
            .backward
            .check_shape(input_width)
            .map_err(|e| format!("backward stack: {e}"))?;
        let from_forward = self
            .mixer
            .in_forward
            .check_shape(forward)
            .map_err(|e| format!("forward projection: {e}"))?;
        let from_backward = self
            .mixer
            .in_backward
            .check_shape(backward)
            .map_err(|e| format!("backward projection: {e}"))?;
        if from_forward != from_backward {
            return Err(format!(
                "projections disagree on mixer width ({from_forward} vs {from_backward})"
            ));
        }
        let rate = self.mixer.dropout.rate();
        if !(0.0..1.0).contains(&rate) {
            return Err(format!("dropout rate {rate} outside [0, 1)"));
        }
        let out = self
            .mixer
            .out
            .check_shape(from_forward)
            .map_err(|e| format!("output layer: {e}"))?;
        if out != output_width {
            return Err(format!("emits {out} columns, expected {output_width}"));
        }
        Ok(())
    }

    pub fn dropout_active(&self) -> bool {
        self.mixer.dropout.is_active()
    }

    fn run(&self, input: ArrayView2<'_, f32>, rng: Option<&mut StdRng>) -> BidirTape {
        let (forward_out, forward) = self.forward.forward_taped(input);

        let reversed = input.slice(s![..;-1, ..]);
        let (backward_rev, backward) = self.backward.forward_taped(reversed);
        let backward_out = backward_rev.slice(s![..;-1, ..]).to_owned();

        let mut mixed = self.mixer.in_forward.forward(forward_out.view())
            + self.mixer.in_backward.forward(backward_out.view());
        let mask = rng.and_then(|rng| self.mixer.dropout.mask(mixed.dim(), rng));
        if let Some(mask) = &mask {
            mixed *= mask;
        }
        let log_probs = log_softmax(&self.mixer.out.forward(mixed.view()));

        BidirTape {
            forward,
            backward,
            forward_out,
            backward_out,
            mixed,
            mask,
            log_probs,
        }
    }
}

impl SeqFunc for Bidir {
    type Tape = BidirTape;

    fn apply(&self, batch: &[Array2<f32>]) -> Vec<Array2<f32>> {
        batch
            .iter()
            .map(|seq| self.run(seq.view(), None).log_probs)
            .collect()
    }

    fn forward(&self, input: ArrayView2<'_, f32>, rng: &mut StdRng) -> (Array2<f32>, BidirTape) {
        let tape = self.run(input, Some(rng));
        (tape.log_probs.clone(), tape)
    }

    fn backward(
        &self,
        tape: &BidirTape,
        grad_output: ArrayView2<'_, f32>,
    ) -> (Gradients, Array2<f32>) {
        let d_logits = log_softmax_backward(&tape.log_probs, grad_output);
        let (out_grads, mut d_mixed) = self.mixer.out.backward(tape.mixed.view(), d_logits.view());
        if let Some(mask) = &tape.mask {
            d_mixed *= mask;
        }

        let (in_f_grads, d_forward_out) = self
            .mixer
            .in_forward
            .backward(tape.forward_out.view(), d_mixed.view());
        let (in_b_grads, d_backward_out) = self
            .mixer
            .in_backward
            .backward(tape.backward_out.view(), d_mixed.view());

        let (forward_grads, d_input_f) = self.forward.backward(&tape.forward, d_forward_out.view());
        let d_backward_rev = d_backward_out.slice(s![..;-1, ..]).to_owned();
        let (backward_grads, d_input_b_rev) =
            self.backward.backward(&tape.backward, d_backward_rev.view());

        let d_input = d_input_f + &d_input_b_rev.slice(s![..;-1, ..]);
        let grads = Gradients::chain([
            forward_grads,
            backward_grads,
            Gradients::new(in_f_grads),
            Gradients::new(in_b_grads),
            Gradients::new(out_grads),
        ]);
        (grads, d_input)
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut params = self.forward.parameters();
        params.extend(self.backward.parameters());
        params.extend(self.mixer.in_forward.parameters());
        params.extend(self.mixer.in_backward.parameters());
        params.extend(self.mixer.out.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut params = self.forward.parameters_mut();
        params.extend(self.backward.parameters_mut());
        params.extend(self.mixer.in_forward.parameters_mut());
        params.extend(self.mixer.in_backward.parameters_mut());
        params.extend(self.mixer.out.parameters_mut());
        params
    }

    fn set_dropout_active(&mut self, active: bool) -> bool {
        self.mixer.dropout.set_active(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InferenceMode;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    fn tiny(dropout: f32) -> Bidir {
        let config = ModelConfig {
            hidden_size: 5,
            layers: 1,
            mixer_size: 6,
            dropout,
            input_scale: 2.0,
            ..ModelConfig::default()
        };
        Bidir::new(4, 3, &config, &mut StdRng::seed_from_u64(11))
    }

    fn frames(len: usize) -> Array2<f32> {
        Array2::from_shape_fn((len, 4), |(t, j)| if (t + j) % 4 == 0 { 1.0 } else { 0.0 })
    }

    #[test]
    fn emits_normalised_distribution_per_frame() {
        let model = tiny(0.0);
        let out = model.apply(&[frames(7), frames(2)]);
        assert_eq!(out[0].dim(), (7, 4));
        assert_eq!(out[1].dim(), (2, 4));
        for row in out[0].rows() {
            let total: f32 = row.iter().map(|x| x.exp()).sum();
            assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn batch_members_do_not_interact() {
        let model = tiny(0.0);
        let alone = model.apply(&[frames(3)]);
        let batched = model.apply(&[frames(9), frames(3), frames(1)]);
        assert_eq!(alone[0], batched[1]);
    }

    #[test]
    fn parameter_and_gradient_lists_line_up() {
        let model = tiny(0.0);
        let mut rng = StdRng::seed_from_u64(0);
        let (out, tape) = model.forward(frames(4).view(), &mut rng);
        let (grads, d_input) = model.backward(&tape, Array2::ones(out.dim()).view());
        let params = model.parameters();
        assert_eq!(grads.tensors().len(), params.len());
        for (g, p) in grads.tensors().iter().zip(&params) {
            assert_eq!(g.shape(), p.shape());
        }
        assert_eq!(d_input.dim(), (4, 4));
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut model = tiny(0.0);
        let input = frames(5);
        let weights = Array2::from_shape_fn((5, 4), |(t, k)| ((t * 4 + k) as f32 * 0.3).sin());
        let loss = |m: &Bidir| (&m.apply(&[input.clone()])[0] * &weights).sum();

        let mut rng = StdRng::seed_from_u64(0);
        let (_, tape) = model.forward(input.view(), &mut rng);
        let (grads, _) = model.backward(&tape, weights.view());

        let eps = 1e-2f32;
        for (p_idx, analytic) in grads.tensors().iter().enumerate() {
            let flat = analytic.len() / 3;
            let saved = model.parameters()[p_idx].iter().nth(flat).copied().unwrap();
            let set = |m: &mut Bidir, v: f32| {
                if let Some(x) = m.parameters_mut()[p_idx].iter_mut().nth(flat) {
                    *x = v;
                }
            };
            set(&mut model, saved + eps);
            let plus = loss(&model);
            set(&mut model, saved - eps);
            let minus = loss(&model);
            set(&mut model, saved);

            let numeric = (plus - minus) / (2.0 * eps);
            let exact = analytic.iter().nth(flat).copied().unwrap();
            assert!(
                (numeric - exact).abs() <= 2e-3 + 0.02 * exact.abs(),
                "param {p_idx}: numeric {numeric} vs analytic {exact}"
            );
        }
    }

    #[test]
    fn shape_check_follows_the_chain() {
        let model = tiny(0.2);
        assert_eq!(model.check_shape(4, 4), Ok(()));
        assert!(model.check_shape(5, 4).unwrap_err().starts_with("forward stack"));
        assert!(model.check_shape(4, 5).unwrap_err().starts_with("emits"));

        let mut wider = model.clone();
        wider.backward = LstmStack::new(4, 7, 1, 1.0, &mut StdRng::seed_from_u64(3));
        assert!(wider
            .check_shape(4, 4)
            .unwrap_err()
            .starts_with("backward projection"));

        let mut certain = model;
        certain.mixer.dropout = Dropout::new(1.0);
        assert!(certain.check_shape(4, 4).unwrap_err().contains("dropout"));
    }

    #[test]
    fn inference_mode_restores_dropout() {
        let mut model = tiny(0.5);
        model.set_dropout_active(true);
        {
            let guard = InferenceMode::enter(&mut model);
            assert!(!guard.dropout_active());
            let mut rng = StdRng::seed_from_u64(1);
            let (a, _) = guard.forward(frames(3).view(), &mut rng);
            let (b, _) = guard.forward(frames(3).view(), &mut rng);
            assert_eq!(a, b);
        }
        assert!(model.dropout_active());
    }

    #[test]
    fn active_dropout_perturbs_training_forward() {
        let mut model = tiny(0.5);
        let clean = model.apply(&[frames(6)]).remove(0);
        model.set_dropout_active(true);
        let mut rng = StdRng::seed_from_u64(5);
        let (noisy, _) = model.forward(frames(6).view(), &mut rng);
        assert_ne!(clean, noisy);
        // Inference ignores the mode.
        assert_eq!(model.apply(&[frames(6)]).remove(0), clean);
    }
}
