//! Adam optimizer over a model's flat parameter list.

use ndarray::{ArrayD, Zip};

use crate::error::{GraphoneError, Result};
use crate::model::{Gradients, SeqFunc};

#[derive(Debug, Clone)]
pub struct Adam {
    pub step_size: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    steps: i32,
    first: Vec<ArrayD<f32>>,
    second: Vec<ArrayD<f32>>,
}

impl Adam {
    pub fn new(step_size: f32) -> Self {
        Self {
            step_size,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            steps: 0,
            first: Vec::new(),
            second: Vec::new(),
        }
    }

    /// Updates applied so far.
    pub fn steps(&self) -> i32 {
        self.steps
    }

    /// Descend along `grads`. Moment buffers are sized on the first call.
    ///
    /// # Errors
    /// [`GraphoneError::Config`] if `grads` does not match the model's
    /// parameter list (count or shapes).
    pub fn step<M: SeqFunc + ?Sized>(&mut self, model: &mut M, grads: &Gradients) -> Result<()> {
        let mut params = model.parameters_mut();
        let tensors = grads.tensors();
        if params.len() != tensors.len() {
            return Err(GraphoneError::Config(format!(
                "{} gradients for {} parameters",
                tensors.len(),
                params.len()
            )));
        }
        if let Some(i) = params
            .iter()
            .zip(tensors)
            .position(|(p, g)| p.shape() != g.shape())
        {
            return Err(GraphoneError::Config(format!(
                "gradient {i} has shape {:?}, parameter has {:?}",
                tensors[i].shape(),
                params[i].shape()
            )));
        }
        if self.first.len() != tensors.len() {
            self.first = tensors.iter().map(|g| ArrayD::zeros(g.raw_dim())).collect();
            self.second = self.first.clone();
            self.steps = 0;
        }

        self.steps = self.steps.saturating_add(1);
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
        let correction1 = 1.0 - b1.powi(self.steps);
        let correction2 = 1.0 - b2.powi(self.steps);
        let rate = self.step_size * correction2.sqrt() / correction1;

        for (((param, grad), m), v) in params
            .iter_mut()
            .zip(tensors)
            .zip(&mut self.first)
            .zip(&mut self.second)
        {
            Zip::from(param)
                .and(grad)
                .and(m)
                .and(v)
                .for_each(|p, &g, m, v| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    *p -= rate * *m / (v.sqrt() + eps);
                });
        }
        Ok(())
    }
}
