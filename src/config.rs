use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use structopt::StructOpt;

use crate::error::Result;

/// Hyperparameters of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DqnConfig {
    pub batch_size: usize,
    pub gamma: f32,
    pub eps_start: f64,
    pub eps_end: f64,
    pub eps_decay: f64,
    pub target_update: u64,
    pub learning_rate: f32,
    pub memory_capacity: usize,
    pub n_episodes: u64,
    pub checkpoint_every: u64,
    pub plot_every: usize,
    pub rolling_window: usize,
    pub action_repeat: usize,
    /// Agent actions are shifted by this offset before reaching the
    /// environment (0, 1 -> RIGHT, LEFT).
    pub action_offset: usize,
    pub n_actions: usize,
    /// Keep playing after a lost life instead of ending the episode.
    pub full_game: bool,
    pub seed: u64,
    pub output_dir: PathBuf,
}

impl Default for DqnConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            gamma: 0.999,
            eps_start: 0.95,
            eps_end: 0.05,
            eps_decay: 200000.0,
            target_update: 200,
            learning_rate: 1e-5,
            memory_capacity: 100000,
            n_episodes: 50000,
            checkpoint_every: 1000,
            plot_every: 10,
            rolling_window: 100,
            action_repeat: 3,
            action_offset: 2,
            n_actions: 2,
            full_game: false,
            seed: 42,
            output_dir: PathBuf::from("output"),
        }
    }
}

impl DqnConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

#[derive(StructOpt, Debug)]
#[structopt(name = "breakout_dqn")]
pub enum Cli {
    /// Train a DQN agent on Breakout
    Train(TrainArgs),
    /// Play full games greedily with saved policy weights
    Evaluate(EvaluateArgs),
}

#[derive(StructOpt, Debug)]
pub struct TrainArgs {
    /// JSON file with the hyperparameters, the remaining flags are ignored when set
    #[structopt(long = "config", parse(from_os_str))]
    pub config: Option<PathBuf>,

    /// Policy weights to resume from
    #[structopt(long = "resume", parse(from_os_str))]
    pub resume: Option<PathBuf>,

    /// Number of episodes for the training
    #[structopt(long = "n_episodes", short = "n", default_value = "50000")]
    pub n_episodes: u64,

    /// Number of transitions per optimisation step
    #[structopt(long = "batch_size", default_value = "256")]
    pub batch_size: usize,

    /// Discount factor
    #[structopt(long = "gamma", default_value = "0.999")]
    pub gamma: f32,

    /// Initial value for the exploration ratio
    #[structopt(long = "eps_start", default_value = "0.95")]
    pub eps_start: f64,

    /// Final value for the exploration ratio
    #[structopt(long = "eps_end", default_value = "0.05")]
    pub eps_end: f64,

    /// Number of actions over which the exploration ratio decays by a factor e
    #[structopt(long = "eps_decay", default_value = "200000")]
    pub eps_decay: f64,

    /// Episodes between target network synchronisations
    #[structopt(long = "target_update", default_value = "200")]
    pub target_update: u64,

    /// Learning rate of the RMSprop optimizer
    #[structopt(long = "learning_rate", default_value = "0.00001")]
    pub learning_rate: f32,

    /// Capacity of the replay memory
    #[structopt(long = "memory_capacity", default_value = "100000")]
    pub memory_capacity: usize,

    /// Episodes between checkpoints
    #[structopt(long = "checkpoint_every", default_value = "1000")]
    pub checkpoint_every: u64,

    /// Recorded durations between plots
    #[structopt(long = "plot_every", default_value = "10")]
    pub plot_every: usize,

    /// Window of the plotted rolling mean
    #[structopt(long = "rolling_window", default_value = "100")]
    pub rolling_window: usize,

    /// Environment steps per agent action
    #[structopt(long = "action_repeat", default_value = "3")]
    pub action_repeat: usize,

    /// Only end an episode when the game is over
    #[structopt(long = "full_game")]
    pub full_game: bool,

    /// Seed for the environment, the network and the replay memory
    #[structopt(long = "seed", default_value = "42")]
    pub seed: u64,

    /// Directory for plots, checkpoints and the config dump
    #[structopt(long = "output_dir", default_value = "output", parse(from_os_str))]
    pub output_dir: PathBuf,
}

impl TrainArgs {
    pub fn to_config(&self) -> Result<DqnConfig> {
        if let Some(path) = &self.config {
            return DqnConfig::load(path);
        }
        Ok(DqnConfig {
            batch_size: self.batch_size,
            gamma: self.gamma,
            eps_start: self.eps_start,
            eps_end: self.eps_end,
            eps_decay: self.eps_decay,
            target_update: self.target_update,
            learning_rate: self.learning_rate,
            memory_capacity: self.memory_capacity,
            n_episodes: self.n_episodes,
            checkpoint_every: self.checkpoint_every,
            plot_every: self.plot_every,
            rolling_window: self.rolling_window,
            action_repeat: self.action_repeat,
            full_game: self.full_game,
            seed: self.seed,
            output_dir: self.output_dir.clone(),
            ..DqnConfig::default()
        })
    }
}

#[derive(StructOpt, Debug)]
pub struct EvaluateArgs {
    /// Policy weights to play with
    #[structopt(long = "weights", parse(from_os_str))]
    pub weights: PathBuf,

    /// Number of games to play
    #[structopt(long = "n_episodes", short = "n", default_value = "10")]
    pub n_episodes: u64,

    /// Step limit per game
    #[structopt(long = "max_steps", default_value = "10000")]
    pub max_steps: u64,

    /// Seed of the environment
    #[structopt(long = "seed", default_value = "42")]
    pub seed: u64,
}
