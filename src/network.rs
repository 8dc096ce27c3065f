use indexmap::IndexMap;
use ndarray::{ArrayD, ErrorKind, ShapeError};

use crate::error::{DqnError, Result};

use self::layers::{Layer, Parameter};

pub mod activation;
pub mod layers;
pub mod loss;
pub mod optimizer;

pub type StateDict = IndexMap<String, ArrayD<f32>>;

pub(crate) fn incompatible_shape() -> DqnError {
    DqnError::Shape(ShapeError::from_kind(ErrorKind::IncompatibleShape))
}

/// Sequential stack of layers trained by backpropagation.
///
/// Each layer keeps what it needs from the last forward pass, so `backward`
/// must follow the `predict` call whose output it differentiates.
#[derive(Debug, Clone)]
pub struct Network {
    layers: Vec<Box<dyn Layer>>,
    training: bool,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    pub fn new() -> Self {
        Self {
            layers: vec![],
            training: true,
        }
    }

    // add layer to network
    pub fn add(&mut self, layer: Box<dyn Layer>) {
        self.layers.push(layer)
    }

    /// Batch statistics are used (and running statistics updated) in training mode.
    pub fn train(&mut self) {
        self.training = true;
    }

    /// Running statistics are used in evaluation mode.
    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    // predict output for given input
    pub fn predict(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let mut output = input;
        for layer in &mut self.layers {
            output = layer.forward_propagation(output, self.training)?;
        }
        Ok(output)
    }

    /// Propagates dLoss/dOutput back to the input, storing every parameter gradient.
    pub fn backward(&mut self, output_error: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let mut error = output_error;
        for layer in self.layers.iter_mut().rev() {
            error = layer.backward_propagation(error)?;
        }
        Ok(error)
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.layers
            .iter_mut()
            .flat_map(|l| l.parameters_mut())
            .collect()
    }

    pub fn zero_grad(&mut self) {
        for p in self.parameters_mut() {
            p.grad.fill(0.0);
        }
    }

    pub fn clamp_grad(&mut self, min: f32, max: f32) {
        for p in self.parameters_mut() {
            p.grad.mapv_inplace(|g| g.clamp(min, max));
        }
    }

    /// Every parameter and running statistic, keyed `<layer>.<tensor>`.
    pub fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        for layer in &self.layers {
            for p in layer.parameters() {
                state.insert(format!("{}.{}", layer.name(), p.name), p.value.clone());
            }
            for (name, buffer) in layer.buffers() {
                state.insert(format!("{}.{}", layer.name(), name), buffer.clone());
            }
        }
        state
    }

    pub fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        let mut loaded = 0;
        for layer in &mut self.layers {
            let prefix = layer.name().to_string();
            for (name, target) in layer.state_mut() {
                let key = format!("{}.{}", prefix, name);
                let source = state
                    .get(&key)
                    .ok_or_else(|| DqnError::Checkpoint(format!("missing tensor {}", key)))?;
                if source.shape() != target.shape() {
                    return Err(DqnError::Checkpoint(format!(
                        "tensor {} has shape {:?}, expected {:?}",
                        key,
                        source.shape(),
                        target.shape()
                    )));
                }
                target.assign(source);
                loaded += 1;
            }
        }
        if loaded != state.len() {
            return Err(DqnError::Checkpoint(format!(
                "state holds {} tensors but the network only uses {}",
                state.len(),
                loaded
            )));
        }
        Ok(())
    }

    pub fn copy_state_from(&mut self, other: &Network) -> Result<()> {
        self.load_state_dict(&other.state_dict())
    }

    pub fn num_parameters(&self) -> usize {
        self.layers
            .iter()
            .flat_map(|l| l.parameters())
            .map(|p| p.value.len())
            .sum()
    }
}
