mod breakout;
mod space;

use ndarray::Array3;
use thiserror::Error;

pub use breakout::{BreakoutAction, BreakoutEnv, BreakoutObservation};
pub use space::{SpaceInfo, SpaceTypeBounds};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    #[error("environment is not ready to receive actions, reset it first")]
    EnvNotReady,
    #[error("action {0} is outside of the action space")]
    InvalidAction(usize),
}

pub trait Env<T, A> {
    fn reset(&mut self) -> T;
    fn step(&mut self, action: A) -> Result<(T, f64, bool), EnvError>;
    /// Current screen as an RGB image, laid out as (height, width, channel).
    fn render(&self) -> Array3<u8>;
    fn observation_space(&self) -> SpaceInfo;
    fn action_space(&self) -> SpaceInfo;
}
