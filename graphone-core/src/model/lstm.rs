//! LSTM layers with back-propagation through time.
//!
//! Gate pre-activations for a step are `x·W + h_prev·U + b`, laid out as four
//! blocks of `hidden` columns: input, forget, output, cell candidate.

use ndarray::{s, Array1, Array2, ArrayD, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use rand::{rngs::StdRng, Rng};
use serde::{Deserialize, Serialize};

use super::{sigmoid, Gradients, SeqFunc};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmLayer {
    /// `(input, 4 * hidden)`
    w_in: Array2<f32>,
    /// `(hidden, 4 * hidden)`
    w_rec: Array2<f32>,
    /// `4 * hidden`
    bias: Array1<f32>,
}

/// Per-step activations kept for the backward pass.
#[derive(Debug, Clone)]
pub struct LstmTape {
    input: Array2<f32>,
    /// Activated gates, `(steps, 4 * hidden)`.
    gates: Array2<f32>,
    cells: Array2<f32>,
    hidden: Array2<f32>,
}

impl LstmLayer {
    pub fn new<R: Rng + ?Sized>(input: usize, hidden: usize, input_scale: f32, rng: &mut R) -> Self {
        let in_bound = input_scale / (input.max(1) as f32).sqrt();
        let rec_bound = 1.0 / (hidden.max(1) as f32).sqrt();
        let w_in = Array2::from_shape_fn((input, 4 * hidden), |_| rng.gen_range(-in_bound..in_bound));
        let w_rec =
            Array2::from_shape_fn((hidden, 4 * hidden), |_| rng.gen_range(-rec_bound..rec_bound));
        let mut bias = Array1::zeros(4 * hidden);
        // Remember by default.
        bias.slice_mut(s![hidden..2 * hidden]).fill(1.0);
        Self { w_in, w_rec, bias }
    }

    pub fn hidden_size(&self) -> usize {
        self.w_rec.nrows()
    }

    /// Check the weights against an `input`-wide feed. Returns the hidden size.
    pub fn check_shape(&self, input: usize) -> Result<usize, String> {
        let hidden = self.hidden_size();
        let gates = 4 * hidden;
        if self.w_in.dim() != (input, gates) {
            return Err(format!(
                "input weights are {:?}, expected {:?}",
                self.w_in.dim(),
                (input, gates)
            ));
        }
        if self.w_rec.ncols() != gates {
            return Err(format!(
                "recurrent weights are {:?}, expected {:?}",
                self.w_rec.dim(),
                (hidden, gates)
            ));
        }
        if self.bias.len() != gates {
            return Err(format!("bias has {} entries, expected {gates}", self.bias.len()));
        }
        Ok(hidden)
    }

    pub fn forward(&self, input: ArrayView2<'_, f32>) -> LstmTape {
        let steps = input.nrows();
        let h = self.hidden_size();
        let pre = input.dot(&self.w_in) + &self.bias;

        let mut gates = Array2::<f32>::zeros((steps, 4 * h));
        let mut cells = Array2::<f32>::zeros((steps, h));
        let mut hidden = Array2::<f32>::zeros((steps, h));
        let mut h_prev = Array1::<f32>::zeros(h);
        let mut c_prev = Array1::<f32>::zeros(h);

        for t in 0..steps {
            let mut z = &pre.row(t) + &h_prev.dot(&self.w_rec);
            z.slice_mut(s![..3 * h]).mapv_inplace(sigmoid);
            z.slice_mut(s![3 * h..]).mapv_inplace(f32::tanh);

            let mut c_t = Array1::<f32>::zeros(h);
            let mut h_t = Array1::<f32>::zeros(h);
            for k in 0..h {
                let (i, f, o, g) = (z[k], z[h + k], z[2 * h + k], z[3 * h + k]);
                let c = f * c_prev[k] + i * g;
                c_t[k] = c;
                h_t[k] = o * c.tanh();
            }

            gates.row_mut(t).assign(&z);
            cells.row_mut(t).assign(&c_t);
            hidden.row_mut(t).assign(&h_t);
            h_prev = h_t;
            c_prev = c_t;
        }

        LstmTape {
            input: input.to_owned(),
            gates,
            cells,
            hidden,
        }
    }

    /// Returns `[dW_in, dW_rec, db]` and the input gradient.
    pub fn backward(
        &self,
        tape: &LstmTape,
        grad_hidden: ArrayView2<'_, f32>,
    ) -> (Vec<ArrayD<f32>>, Array2<f32>) {
        let (steps, h) = tape.hidden.dim();
        let mut d_pre = Array2::<f32>::zeros((steps, 4 * h));
        let mut dh_next = Array1::<f32>::zeros(h);
        let mut dc_next = Array1::<f32>::zeros(h);

        for t in (0..steps).rev() {
            {
                let z = tape.gates.row(t);
                let mut dz = d_pre.row_mut(t);
                for k in 0..h {
                    let (i, f, o, g) = (z[k], z[h + k], z[2 * h + k], z[3 * h + k]);
                    let c_prev = if t > 0 { tape.cells[[t - 1, k]] } else { 0.0 };
                    let tc = tape.cells[[t, k]].tanh();

                    let dh = grad_hidden[[t, k]] + dh_next[k];
                    let d_o = dh * tc;
                    let dc = dh * o * (1.0 - tc * tc) + dc_next[k];
                    dc_next[k] = dc * f;

                    dz[k] = dc * g * i * (1.0 - i);
                    dz[h + k] = dc * c_prev * f * (1.0 - f);
                    dz[2 * h + k] = d_o * o * (1.0 - o);
                    dz[3 * h + k] = dc * i * (1.0 - g * g);
                }
            }
            dh_next = d_pre.row(t).dot(&self.w_rec.t());
        }

        let mut h_prev = Array2::<f32>::zeros((steps, h));
        if steps > 1 {
            h_prev
                .slice_mut(s![1.., ..])
                .assign(&tape.hidden.slice(s![..steps - 1, ..]));
        }

        let d_w_in = tape.input.t().dot(&d_pre);
        let d_w_rec = h_prev.t().dot(&d_pre);
        let d_bias = d_pre.sum_axis(Axis(0));
        let d_input = d_pre.dot(&self.w_in.t());

        (
            vec![d_w_in.into_dyn(), d_w_rec.into_dyn(), d_bias.into_dyn()],
            d_input,
        )
    }

    fn parameters(&self) -> [ArrayViewD<'_, f32>; 3] {
        [
            self.w_in.view().into_dyn(),
            self.w_rec.view().into_dyn(),
            self.bias.view().into_dyn(),
        ]
    }

    fn parameters_mut(&mut self) -> [ArrayViewMutD<'_, f32>; 3] {
        [
            self.w_in.view_mut().into_dyn(),
            self.w_rec.view_mut().into_dyn(),
            self.bias.view_mut().into_dyn(),
        ]
    }
}

/// Stacked LSTM layers reading one direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmStack {
    layers: Vec<LstmLayer>,
}

impl LstmStack {
    /// `layers` LSTMs of width `hidden`; only the first sees `input_scale`.
    pub fn new<R: Rng + ?Sized>(
        input: usize,
        hidden: usize,
        layers: usize,
        input_scale: f32,
        rng: &mut R,
    ) -> Self {
        let layers = (0..layers.max(1))
            .map(|i| {
                if i == 0 {
                    LstmLayer::new(input, hidden, input_scale, rng)
                } else {
                    LstmLayer::new(hidden, hidden, 1.0, rng)
                }
            })
            .collect();
        Self { layers }
    }

    /// Walk the layers from an `input`-wide feed. Returns the output width.
    pub fn check_shape(&self, input: usize) -> Result<usize, String> {
        if self.layers.is_empty() {
            return Err("stack has no layers".to_string());
        }
        self.layers
            .iter()
            .enumerate()
            .try_fold(input, |width, (i, layer)| {
                layer
                    .check_shape(width)
                    .map_err(|e| format!("layer {i}: {e}"))
            })
    }

    /// Forward pass without an RNG; LSTM stacks have no stochastic layers.
    pub(crate) fn forward_taped(&self, input: ArrayView2<'_, f32>) -> (Array2<f32>, Vec<LstmTape>) {
        let tapes = self.run(input);
        let output = tapes
            .last()
            .map(|t| t.hidden.clone())
            .unwrap_or_else(|| input.to_owned());
        (output, tapes)
    }

    fn run(&self, input: ArrayView2<'_, f32>) -> Vec<LstmTape> {
        let mut tapes: Vec<LstmTape> = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let tape = match tapes.last() {
                Some(prev) => layer.forward(prev.hidden.view()),
                None => layer.forward(input),
            };
            tapes.push(tape);
        }
        tapes
    }
}

impl SeqFunc for LstmStack {
    type Tape = Vec<LstmTape>;

    fn apply(&self, batch: &[Array2<f32>]) -> Vec<Array2<f32>> {
        batch
            .iter()
            .map(|seq| {
                self.run(seq.view())
                    .pop()
                    .map(|t| t.hidden)
                    .unwrap_or_else(|| seq.clone())
            })
            .collect()
    }

    fn forward(&self, input: ArrayView2<'_, f32>, _rng: &mut StdRng) -> (Array2<f32>, Self::Tape) {
        self.forward_taped(input)
    }

    fn backward(
        &self,
        tape: &Self::Tape,
        grad_output: ArrayView2<'_, f32>,
    ) -> (Gradients, Array2<f32>) {
        let mut per_layer: Vec<Vec<ArrayD<f32>>> = Vec::with_capacity(self.layers.len());
        let mut grad = grad_output.to_owned();
        for (layer, layer_tape) in self.layers.iter().zip(tape).rev() {
            let (grads, d_input) = layer.backward(layer_tape, grad.view());
            per_layer.push(grads);
            grad = d_input;
        }
        per_layer.reverse();
        let grads = Gradients::new(per_layer.into_iter().flatten().collect());
        (grads, grad)
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        self.layers.iter().flat_map(LstmLayer::parameters).collect()
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        self.layers
            .iter_mut()
            .flat_map(LstmLayer::parameters_mut)
            .collect()
    }
}
