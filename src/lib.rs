pub mod action_selection;
pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod env;
pub mod error;
pub mod experience_buffer;
pub mod model;
pub mod network;
pub mod screen;
pub mod trainer;
pub mod utils;

pub use agent::DqnAgent;
pub use config::DqnConfig;
pub use error::{DqnError, Result};
pub use trainer::{TrainResults, Trainer};
