use ndarray::{ArrayD, Zip};

use super::incompatible_shape;
use super::layers::Parameter;
use crate::error::Result;

/// RMSprop without momentum: every weight is scaled by a running average of
/// its squared gradients.
#[derive(Debug, Clone)]
pub struct RmsProp {
    learning_rate: f32,
    alpha: f32,
    eps: f32,
    square_avg: Vec<ArrayD<f32>>,
}

impl RmsProp {
    pub fn new(learning_rate: f32) -> Self {
        Self::with_smoothing(learning_rate, 0.99, 1e-8)
    }

    pub fn with_smoothing(learning_rate: f32, alpha: f32, eps: f32) -> Self {
        Self {
            learning_rate,
            alpha,
            eps,
            square_avg: vec![],
        }
    }

    /// Applies the stored gradients. The parameter list must keep the same
    /// order and shapes between calls.
    pub fn step(&mut self, parameters: Vec<&mut Parameter>) -> Result<()> {
        if self.square_avg.is_empty() {
            self.square_avg = parameters
                .iter()
                .map(|p| ArrayD::zeros(p.value.raw_dim()))
                .collect();
        }
        if self.square_avg.len() != parameters.len() {
            return Err(incompatible_shape());
        }
        let (lr, alpha, eps) = (self.learning_rate, self.alpha, self.eps);
        for (p, avg) in parameters.into_iter().zip(self.square_avg.iter_mut()) {
            if avg.shape() != p.grad.shape() || p.value.shape() != p.grad.shape() {
                return Err(incompatible_shape());
            }
            Zip::from(&mut *avg)
                .and(&p.grad)
                .for_each(|a, &g| *a = alpha * *a + (1.0 - alpha) * g * g);
            Zip::from(&mut p.value)
                .and(&p.grad)
                .and(&*avg)
                .for_each(|w, &g, &a| *w -= lr * g / (a.sqrt() + eps));
        }
        Ok(())
    }
}
