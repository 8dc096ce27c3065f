use thiserror::Error;

use crate::env::EnvError;
use crate::experience_buffer::ReplayError;

#[derive(Error, Debug)]
pub enum DqnError {
    #[error("environment error: {0}")]
    Env(#[from] EnvError),

    #[error("replay memory error: {0}")]
    Replay(#[from] ReplayError),

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("plotting error: {0}")]
    Plot(String),

    #[error("image error: {0}")]
    Image(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

pub type Result<T> = std::result::Result<T, DqnError>;
