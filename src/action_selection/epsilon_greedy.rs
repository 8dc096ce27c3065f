use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{ActionSelection, ValuesFn};
use crate::error::Result;
use crate::utils::argmax;

/// Epsilon-greedy whose exploration rate decays exponentially with the
/// number of actions taken, from `eps_start` towards `eps_end`.
#[derive(Debug, Clone)]
pub struct ExponentialEpsilonGreedy {
    eps_start: f64,
    eps_end: f64,
    eps_decay: f64,
    steps_done: u64,
    rng: StdRng,
}

impl ExponentialEpsilonGreedy {
    pub fn new(eps_start: f64, eps_end: f64, eps_decay: f64, seed: u64) -> Self {
        Self {
            eps_start,
            eps_end,
            eps_decay,
            steps_done: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn steps_done(&self) -> u64 {
        self.steps_done
    }

    fn threshold(&self) -> f64 {
        self.eps_end
            + (self.eps_start - self.eps_end) * (-(self.steps_done as f64) / self.eps_decay).exp()
    }
}

impl ActionSelection for ExponentialEpsilonGreedy {
    fn get_action(&mut self, n_actions: usize, values: &mut ValuesFn<'_>) -> Result<usize> {
        let sample: f64 = self.rng.gen();
        let eps_threshold = self.threshold();
        self.steps_done += 1;
        if sample > eps_threshold {
            Ok(argmax(values()?.iter()))
        } else {
            Ok(self.rng.gen_range(0..n_actions.max(1)))
        }
    }

    fn epsilon(&self) -> f64 {
        self.threshold()
    }

    fn reset(&mut self) {
        self.steps_done = 0;
    }
}
