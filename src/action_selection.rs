mod epsilon_greedy;
mod greedy;

use enum_dispatch::enum_dispatch;
use ndarray::Array1;

use crate::error::Result;

pub use epsilon_greedy::ExponentialEpsilonGreedy;
pub use greedy::Greedy;

/// Lazily computed action values, only evaluated when the selector exploits.
pub type ValuesFn<'a> = dyn FnMut() -> Result<Array1<f32>> + 'a;

#[enum_dispatch]
pub trait ActionSelection {
    fn get_action(&mut self, n_actions: usize, values: &mut ValuesFn<'_>) -> Result<usize>;
    fn epsilon(&self) -> f64;
    fn reset(&mut self);
}

#[enum_dispatch(ActionSelection)]
#[derive(Debug, Clone)]
pub enum EnumActionSelection {
    ExponentialEpsilonGreedy,
    Greedy,
}
