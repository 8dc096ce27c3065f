use super::{ActionSelection, ValuesFn};
use crate::error::Result;
use crate::utils::argmax;

/// Always exploits, used when evaluating a trained network.
#[derive(Debug, Clone, Default)]
pub struct Greedy;

impl ActionSelection for Greedy {
    fn get_action(&mut self, _n_actions: usize, values: &mut ValuesFn<'_>) -> Result<usize> {
        Ok(argmax(values()?.iter()))
    }

    fn epsilon(&self) -> f64 {
        0.0
    }

    fn reset(&mut self) {}
}
