use std::path::{Path, PathBuf};

use kdam::{tqdm, BarExt};
use ndarray::Array3;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::action_selection::Greedy;
use crate::agent::DqnAgent;
use crate::config::DqnConfig;
use crate::env::{BreakoutAction, BreakoutEnv, Env, EnvError};
use crate::error::Result;
use crate::experience_buffer::Transition;
use crate::screen::{blend, get_screen};
use crate::utils::plot_durations;

/// Per episode history of a training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainResults {
    pub durations: Vec<f64>,
    pub rewards: Vec<f64>,
    /// Mean loss of the optimisation steps taken during each episode, 0 when
    /// the memory was still too small to learn from.
    pub losses: Vec<f64>,
}

/// Outcome of one agent step.
struct StepOutcome {
    reward: f64,
    terminated: bool,
}

pub struct Trainer {
    env: BreakoutEnv,
    config: DqnConfig,
}

impl Trainer {
    pub fn new(env: BreakoutEnv, config: DqnConfig) -> Self {
        Self { env, config }
    }

    fn screen(&self) -> Result<Array3<f32>> {
        get_screen(&self.env.render())
    }

    /// FIRE once, then the agent's action `action_repeat` times, summing the
    /// rewards of the repeated action.
    fn act(&mut self, action: usize) -> Result<StepOutcome> {
        let (_, _, terminated) = self.env.step(BreakoutAction::Fire)?;
        if terminated {
            return Ok(StepOutcome {
                reward: 0.0,
                terminated,
            });
        }
        let env_action = BreakoutAction::try_from(action + self.config.action_offset)?;
        let mut reward = 0.0;
        for _ in 0..self.config.action_repeat {
            let (_, r, terminated) = self.env.step(env_action)?;
            reward += r;
            if terminated {
                return Ok(StepOutcome {
                    reward,
                    terminated,
                });
            }
        }
        Ok(StepOutcome {
            reward,
            terminated: false,
        })
    }

    /// Plays one episode, storing every transition and optimising after
    /// each step. Returns (duration, reward, mean loss).
    fn run_episode(&mut self, agent: &mut DqnAgent) -> Result<(u64, f64, f64)> {
        self.env.reset();
        self.env.step(BreakoutAction::Fire)?;
        let start_lives = self.env.lives();
        let mut last_screen = self.screen()?;
        let mut current_screen = self.screen()?;
        let mut state = blend(&current_screen, &last_screen);

        let mut episode_reward = 0.0;
        let mut loss_sum = 0.0;
        let mut loss_count = 0;
        let mut t: u64 = 0;
        loop {
            let action = agent.select_action(&state)?;
            let outcome = self.act(action)?;
            episode_reward += outcome.reward;

            let life_lost = self.env.lives() < start_lives;
            let done = outcome.terminated || (!self.config.full_game && life_lost);

            last_screen = current_screen;
            current_screen = self.screen()?;
            let next_state = if done {
                None
            } else {
                Some(blend(&current_screen, &last_screen))
            };

            agent.push(Transition::new(
                state,
                action,
                next_state.clone(),
                outcome.reward as f32,
            ));

            if let Some(loss) = agent.optimize_model()? {
                loss_sum += loss as f64;
                loss_count += 1;
            }

            match next_state {
                Some(next_state) => state = next_state,
                None => break,
            }
            t += 1;
        }
        let mean_loss = if loss_count > 0 {
            loss_sum / loss_count as f64
        } else {
            0.0
        };
        Ok((t + 1, episode_reward, mean_loss))
    }

    fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    pub fn plot_path(&self, n_durations: usize) -> PathBuf {
        self.output_dir().join(format!("Duration_{}.png", n_durations))
    }

    pub fn train(&mut self, agent: &mut DqnAgent) -> Result<TrainResults> {
        let highest_action = self.config.action_offset + agent.n_actions();
        if highest_action > self.env.action_space().get_discrete_combinations() {
            return Err(EnvError::InvalidAction(highest_action - 1).into());
        }
        std::fs::create_dir_all(self.output_dir())?;
        self.config.save(&self.output_dir().join("config.json"))?;

        let mut results = TrainResults::default();
        let n_episodes = self.config.n_episodes;
        let mut pb = tqdm!(total = n_episodes as usize);
        pb.set_description("DQN");
        pb.refresh();

        for episode in 0..n_episodes {
            let (duration, reward, loss) = self.run_episode(agent)?;
            results.durations.push(duration as f64);
            results.rewards.push(reward);
            results.losses.push(loss);
            debug!(episode, duration, reward, loss, "episode finished");

            let n = results.durations.len();
            if self.config.plot_every > 0 && n % self.config.plot_every == 0 {
                let path = self.plot_path(n);
                let window = self.config.rolling_window;
                if let Err(e) = plot_durations(&results.durations, window, &path) {
                    warn!(error = %e, path = %path.display(), "could not plot durations");
                }
            }

            if self.config.target_update > 0 && episode % self.config.target_update == 0 {
                agent.update_target_network()?;
            }
            if self.config.checkpoint_every > 0 && episode % self.config.checkpoint_every == 0 {
                agent.save_checkpoints(self.output_dir(), episode)?;
            }

            pb.set_postfix(format!(
                "duration={}, eps={:.3}, loss={:.5}",
                duration,
                agent.epsilon(),
                loss
            ));
            pb.update(1);
        }
        info!(
            episodes = n_episodes,
            transitions = agent.memory_len(),
            "training complete"
        );
        Ok(results)
    }

    /// Greedy play of full games with the policy in evaluation mode. Returns
    /// the reward and the number of agent steps of every game.
    pub fn evaluate(
        &mut self,
        agent: &mut DqnAgent,
        n_episodes: u64,
        max_steps: u64,
    ) -> Result<(Vec<f64>, Vec<u64>)> {
        let previous = agent.replace_action_selection(Greedy.into());
        agent.policy_mut().eval();
        let result = self.play_games(agent, n_episodes, max_steps);
        agent.policy_mut().train();
        agent.replace_action_selection(previous);
        result
    }

    fn play_games(
        &mut self,
        agent: &mut DqnAgent,
        n_episodes: u64,
        max_steps: u64,
    ) -> Result<(Vec<f64>, Vec<u64>)> {
        let mut reward_history: Vec<f64> = vec![];
        let mut episode_length: Vec<u64> = vec![];
        for _episode in tqdm!(0..n_episodes) {
            self.env.reset();
            self.env.step(BreakoutAction::Fire)?;
            let mut last_screen = self.screen()?;
            let mut current_screen = self.screen()?;
            let mut epi_reward = 0.0;
            let mut action_counter: u64 = 0;
            while action_counter < max_steps {
                action_counter += 1;
                let state = blend(&current_screen, &last_screen);
                let outcome = self.act(agent.select_action(&state)?)?;
                epi_reward += outcome.reward;
                if outcome.terminated {
                    break;
                }
                last_screen = current_screen;
                current_screen = self.screen()?;
            }
            reward_history.push(epi_reward);
            episode_length.push(action_counter);
        }
        Ok((reward_history, episode_length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DqnError;

    fn small_config(dir: &str) -> DqnConfig {
        DqnConfig {
            batch_size: 4,
            memory_capacity: 4096,
            n_episodes: 3,
            checkpoint_every: 2,
            plot_every: 2,
            rolling_window: 2,
            output_dir: std::env::temp_dir()
                .join(format!("breakout_dqn_{}_{}", dir, std::process::id())),
            ..DqnConfig::default()
        }
    }

    #[test]
    fn act_rejects_unknown_agent_actions() {
        let config = small_config("act");
        let mut trainer = Trainer::new(BreakoutEnv::new(0), config);
        trainer.env.reset();
        assert!(matches!(
            trainer.act(2),
            Err(DqnError::Env(EnvError::InvalidAction(4)))
        ));
    }

    #[test]
    fn episode_ends_on_first_lost_life() {
        let config = small_config("episode");
        let mut agent = DqnAgent::from_config(&config).unwrap();
        let mut trainer = Trainer::new(BreakoutEnv::new(1), config);
        let (duration, _, _) = trainer.run_episode(&mut agent).unwrap();
        assert!(duration >= 1);
        assert_eq!(agent.memory_len() as u64, duration);
        assert!(trainer.env.lives() < BreakoutEnv::START_LIVES);
    }

    #[test]
    fn train_writes_checkpoints_and_config() {
        let config = small_config("train");
        let dir = config.output_dir.clone();
        let mut agent = DqnAgent::from_config(&config).unwrap();
        let mut trainer = Trainer::new(BreakoutEnv::new(2), config);
        let results = trainer.train(&mut agent).unwrap();

        assert_eq!(results.durations.len(), 3);
        assert_eq!(results.rewards.len(), 3);
        assert_eq!(results.losses.len(), 3);
        assert!(dir.join("config.json").exists());
        assert!(dir.join("policy_net_0.json").exists());
        assert!(dir.join("target_net_2.json").exists());
        assert!(!dir.join("policy_net_1.json").exists());
        assert!(dir.join("Duration_2.png").exists());
        assert!(!dir.join("Duration_1.png").exists());
        assert!(!dir.join("Duration_3.png").exists());
        std::fs::remove_dir_all(dir).unwrap();
    }

    fn greedy_config(name: &str, n_episodes: u64) -> DqnConfig {
        DqnConfig {
            n_episodes,
            target_update: 2,
            eps_start: 0.0,
            eps_end: 0.0,
            ..small_config(name)
        }
    }

    #[test]
    fn target_follows_policy_only_on_sync_episodes() {
        // episode 0 syncs, episode 1 does not
        let config = greedy_config("sync_two", 2);
        let dir = config.output_dir.clone();
        let mut agent = DqnAgent::from_config(&config).unwrap();
        let mut trainer = Trainer::new(BreakoutEnv::new(5), config);
        trainer.train(&mut agent).unwrap();
        assert_ne!(agent.target().state_dict(), agent.policy_mut().state_dict());
        std::fs::remove_dir_all(dir).unwrap();

        // episode 2 syncs again
        let config = greedy_config("sync_three", 3);
        let dir = config.output_dir.clone();
        let mut agent = DqnAgent::from_config(&config).unwrap();
        let mut trainer = Trainer::new(BreakoutEnv::new(5), config);
        trainer.train(&mut agent).unwrap();
        assert_eq!(agent.target().state_dict(), agent.policy_mut().state_dict());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn full_game_episode_plays_until_game_over() {
        let config = DqnConfig {
            full_game: true,
            // never learns, keeps the episode cheap
            batch_size: 8192,
            ..small_config("full_game")
        };
        let mut agent = DqnAgent::from_config(&config).unwrap();
        let mut trainer = Trainer::new(BreakoutEnv::new(6), config);
        let (duration, _, loss) = trainer.run_episode(&mut agent).unwrap();
        assert_eq!(trainer.env.lives(), 0);
        assert_eq!(agent.memory_len() as u64, duration);
        assert_eq!(loss, 0.0);
        assert!(matches!(
            trainer.env.step(BreakoutAction::Noop),
            Err(EnvError::EnvNotReady)
        ));
    }

    #[test]
    fn evaluation_restores_training_mode() {
        let config = small_config("evaluate");
        let mut agent = DqnAgent::from_config(&config).unwrap();
        let epsilon = agent.epsilon();
        let mut trainer = Trainer::new(BreakoutEnv::new(3), config);
        let (rewards, lengths) = trainer.evaluate(&mut agent, 2, 50).unwrap();
        assert_eq!(rewards.len(), 2);
        assert!(lengths.iter().all(|l| (1..=50).contains(l)));
        assert!(agent.policy_mut().is_training());
        assert_eq!(agent.epsilon(), epsilon);
    }

    #[test]
    fn train_rejects_actions_outside_the_env() {
        let config = DqnConfig {
            action_offset: 3,
            ..small_config("offset")
        };
        let mut agent = DqnAgent::from_config(&config).unwrap();
        let mut trainer = Trainer::new(BreakoutEnv::new(4), config);
        assert!(matches!(
            trainer.train(&mut agent),
            Err(DqnError::Env(EnvError::InvalidAction(4)))
        ));
    }
}
