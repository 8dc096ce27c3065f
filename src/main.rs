use std::fs::File;
use std::io::BufWriter;

use breakout_dqn::config::{Cli, EvaluateArgs, TrainArgs};
use breakout_dqn::env::BreakoutEnv;
use breakout_dqn::{DqnAgent, DqnConfig, Result, Trainer};
use structopt::StructOpt;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn train(args: TrainArgs) -> Result<()> {
    let config = args.to_config()?;
    info!(?config, "starting training");
    let mut agent = DqnAgent::from_config(&config)?;
    if let Some(path) = &args.resume {
        agent.load_policy(path)?;
    }
    let history_path = config.output_dir.join("history.json");
    let mut trainer = Trainer::new(BreakoutEnv::new(config.seed), config);
    let results = trainer.train(&mut agent)?;

    let writer = BufWriter::new(File::create(&history_path)?);
    serde_json::to_writer(writer, &results)?;
    info!(path = %history_path.display(), "wrote training history");
    Ok(())
}

fn evaluate(args: EvaluateArgs) -> Result<()> {
    let config = DqnConfig {
        seed: args.seed,
        batch_size: 1,
        memory_capacity: 1,
        ..DqnConfig::default()
    };
    let mut agent = DqnAgent::from_config(&config)?;
    agent.load_policy(&args.weights)?;
    let mut trainer = Trainer::new(BreakoutEnv::new(args.seed), config);
    let (rewards, lengths) = trainer.evaluate(&mut agent, args.n_episodes, args.max_steps)?;

    let games = rewards.len().max(1) as f64;
    let mean_reward = rewards.iter().sum::<f64>() / games;
    let mean_length = lengths.iter().sum::<u64>() as f64 / games;
    info!(
        games = rewards.len(),
        mean_reward, mean_length, "evaluation done"
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::from_args() {
        Cli::Train(args) => train(args),
        Cli::Evaluate(args) => evaluate(args),
    }
}
