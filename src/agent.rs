use std::path::Path;

use ndarray::{stack, Array1, Array2, Array3, Array4, ArrayView3, Axis, Ix1, Ix2};
use tracing::{debug, info};

use crate::action_selection::{
    ActionSelection, EnumActionSelection, ExponentialEpsilonGreedy, ValuesFn,
};
use crate::checkpoint::{
    checkpoint_path, load_state_dict, save_state_dict, POLICY_PREFIX, TARGET_PREFIX,
};
use crate::config::DqnConfig;
use crate::env::EnvError;
use crate::error::Result;
use crate::experience_buffer::{ReplayMemory, Transition};
use crate::model::dqn;
use crate::network::loss::{smooth_l1, smooth_l1_prime};
use crate::network::optimizer::RmsProp;
use crate::network::Network;
use crate::screen::SCREEN_SIZE;

pub const GRAD_CLAMP: f32 = 1.0;

/// Deep Q-learning agent: a policy network trained from replayed
/// transitions against a periodically synchronised target network.
#[derive(Debug, Clone)]
pub struct DqnAgent {
    policy: Network,
    target: Network,
    optimizer: RmsProp,
    memory: ReplayMemory<Transition>,
    action_selection: EnumActionSelection,
    n_actions: usize,
    batch_size: usize,
    gamma: f32,
}

impl DqnAgent {
    /// The target network starts as a copy of `policy` and stays in
    /// evaluation mode.
    pub fn new(
        policy: Network,
        optimizer: RmsProp,
        memory: ReplayMemory<Transition>,
        action_selection: EnumActionSelection,
        n_actions: usize,
        batch_size: usize,
        gamma: f32,
    ) -> Self {
        let mut policy = policy;
        policy.train();
        let mut target = policy.clone();
        target.eval();
        Self {
            policy,
            target,
            optimizer,
            memory,
            action_selection,
            n_actions,
            batch_size,
            gamma,
        }
    }

    pub fn from_config(config: &DqnConfig) -> Result<Self> {
        let policy = dqn(SCREEN_SIZE, config.n_actions, config.seed);
        let memory = ReplayMemory::new(config.memory_capacity, config.seed)?;
        let action_selection = ExponentialEpsilonGreedy::new(
            config.eps_start,
            config.eps_end,
            config.eps_decay,
            config.seed,
        );
        info!(
            parameters = policy.num_parameters(),
            batch_size = config.batch_size,
            "built policy network"
        );
        Ok(Self::new(
            policy,
            RmsProp::new(config.learning_rate),
            memory,
            action_selection.into(),
            config.n_actions,
            config.batch_size,
            config.gamma,
        ))
    }

    pub fn select_action(&mut self, state: &Array3<f32>) -> Result<usize> {
        let policy = &mut self.policy;
        let mut values = || -> Result<Array1<f32>> {
            let input = state.clone().insert_axis(Axis(0)).into_dyn();
            let output = policy.predict(input)?;
            Ok(output.index_axis_move(Axis(0), 0).into_dimensionality::<Ix1>()?)
        };
        let lazy_values: &mut ValuesFn<'_> = &mut values;
        self.action_selection.get_action(self.n_actions, lazy_values)
    }

    pub fn push(&mut self, transition: Transition) {
        self.memory.push(transition);
    }

    /// One gradient step on a sampled batch. `None` until the memory holds
    /// at least one batch.
    pub fn optimize_model(&mut self) -> Result<Option<f32>> {
        if self.batch_size == 0 || self.memory.len() < self.batch_size {
            return Ok(None);
        }
        let batch = self.memory.sample(self.batch_size)?;
        let n = batch.len();
        let (c, h, w) = batch[0].state.dim();

        let mut states = Array4::zeros((n, c, h, w));
        let mut actions: Vec<usize> = Vec::with_capacity(n);
        let mut rewards = Array1::zeros(n);
        let mut non_final: Vec<usize> = vec![];
        let mut next_states: Vec<ArrayView3<f32>> = vec![];
        for (i, transition) in batch.iter().enumerate() {
            if transition.action >= self.n_actions {
                return Err(EnvError::InvalidAction(transition.action).into());
            }
            states.index_axis_mut(Axis(0), i).assign(&transition.state);
            actions.push(transition.action);
            rewards[i] = transition.reward;
            if let Some(next_state) = &transition.next_state {
                non_final.push(i);
                next_states.push(next_state.view());
            }
        }

        // V(s') = max_a target(s', a), zero for final states
        let mut next_values: Array1<f32> = Array1::zeros(n);
        if !next_states.is_empty() {
            let next_batch = stack(Axis(0), &next_states)?;
            let target_q = self
                .target
                .predict(next_batch.into_dyn())?
                .into_dimensionality::<Ix2>()?;
            for (row, &i) in target_q.outer_iter().zip(non_final.iter()) {
                next_values[i] = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            }
        }
        let expected = (next_values * self.gamma + rewards).insert_axis(Axis(1));

        let q = self
            .policy
            .predict(states.into_dyn())?
            .into_dimensionality::<Ix2>()?;
        let state_action_values =
            Array2::from_shape_fn((n, 1), |(i, _)| q[[i, actions[i]]]);
        let loss = smooth_l1(&expected, &state_action_values).unwrap_or(0.0);

        let loss_prime = smooth_l1_prime(&expected, &state_action_values);
        let mut output_error = Array2::zeros(q.raw_dim());
        for (i, &action) in actions.iter().enumerate() {
            output_error[[i, action]] = loss_prime[[i, 0]];
        }
        self.policy.zero_grad();
        self.policy.backward(output_error.into_dyn())?;
        self.policy.clamp_grad(-GRAD_CLAMP, GRAD_CLAMP);
        self.optimizer.step(self.policy.parameters_mut())?;
        Ok(Some(loss))
    }

    pub fn update_target_network(&mut self) -> Result<()> {
        self.target.copy_state_from(&self.policy)?;
        debug!("target network synchronised");
        Ok(())
    }

    pub fn save_checkpoints(&self, dir: &Path, episode: u64) -> Result<()> {
        save_state_dict(
            &checkpoint_path(dir, POLICY_PREFIX, episode),
            &self.policy.state_dict(),
        )?;
        save_state_dict(
            &checkpoint_path(dir, TARGET_PREFIX, episode),
            &self.target.state_dict(),
        )?;
        info!(episode, dir = %dir.display(), "saved checkpoints");
        Ok(())
    }

    /// Loads policy weights and synchronises the target network with them.
    pub fn load_policy(&mut self, path: &Path) -> Result<()> {
        let state = load_state_dict(path)?;
        self.policy.load_state_dict(&state)?;
        self.update_target_network()?;
        info!(path = %path.display(), "loaded policy weights");
        Ok(())
    }

    /// Swaps the action selector, returning the previous one.
    pub fn replace_action_selection(
        &mut self,
        action_selection: EnumActionSelection,
    ) -> EnumActionSelection {
        std::mem::replace(&mut self.action_selection, action_selection)
    }

    pub fn policy_mut(&mut self) -> &mut Network {
        &mut self.policy
    }

    pub fn target(&self) -> &Network {
        &self.target
    }

    pub fn epsilon(&self) -> f64 {
        self.action_selection.epsilon()
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn n_actions(&self) -> usize {
        self.n_actions
    }
}
