use breakout_dqn::checkpoint::{checkpoint_path, load_state_dict, POLICY_PREFIX, TARGET_PREFIX};
use breakout_dqn::env::BreakoutEnv;
use breakout_dqn::{DqnAgent, DqnConfig, Trainer};

fn tiny_config(name: &str) -> DqnConfig {
    DqnConfig {
        batch_size: 8,
        memory_capacity: 2048,
        n_episodes: 4,
        target_update: 2,
        checkpoint_every: 3,
        plot_every: 2,
        rolling_window: 2,
        eps_decay: 50.0,
        learning_rate: 1e-3,
        seed: 7,
        output_dir: std::env::temp_dir()
            .join(format!("breakout_dqn_it_{}_{}", name, std::process::id())),
        ..DqnConfig::default()
    }
}

#[test]
fn short_training_run_then_greedy_evaluation() {
    let config = tiny_config("train");
    let dir = config.output_dir.clone();
    let mut agent = DqnAgent::from_config(&config).unwrap();
    let mut trainer = Trainer::new(BreakoutEnv::new(config.seed), config.clone());
    let results = trainer.train(&mut agent).unwrap();

    assert_eq!(results.durations.len(), 4);
    assert!(results.durations.iter().all(|d| *d >= 1.0));
    assert!(results.rewards.iter().all(|r| *r >= 0.0));
    assert!(agent.memory_len() as f64 <= results.durations.iter().sum::<f64>());

    let saved = DqnConfig::load(&dir.join("config.json")).unwrap();
    assert_eq!(saved, config);

    for episode in [0, 3] {
        let policy = load_state_dict(&checkpoint_path(&dir, POLICY_PREFIX, episode)).unwrap();
        let target = load_state_dict(&checkpoint_path(&dir, TARGET_PREFIX, episode)).unwrap();
        assert_eq!(policy.len(), 20);
        assert_eq!(target["head.weight"].shape(), &[2, 144]);
    }
    assert!(!checkpoint_path(&dir, POLICY_PREFIX, 1).exists());

    let mut fresh = DqnAgent::from_config(&DqnConfig {
        seed: 99,
        ..tiny_config("fresh")
    })
    .unwrap();
    fresh
        .load_policy(&checkpoint_path(&dir, POLICY_PREFIX, 3))
        .unwrap();
    let (rewards, lengths) = trainer.evaluate(&mut fresh, 1, 30).unwrap();
    assert_eq!(rewards.len(), 1);
    assert!(lengths[0] >= 1 && lengths[0] <= 30);

    std::fs::remove_dir_all(dir).unwrap();
}
