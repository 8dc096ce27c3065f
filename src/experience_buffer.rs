use ndarray::Array3;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("replay memory capacity must be greater than zero")]
    ZeroCapacity,
    #[error("cannot sample {requested} transitions from a memory holding {available}")]
    NotEnoughTransitions { requested: usize, available: usize },
}

/// One agent step. `next_state` is `None` when the step ended the episode.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: Array3<f32>,
    pub action: usize,
    pub next_state: Option<Array3<f32>>,
    pub reward: f32,
}

impl Transition {
    pub fn new(
        state: Array3<f32>,
        action: usize,
        next_state: Option<Array3<f32>>,
        reward: f32,
    ) -> Self {
        Self {
            state,
            action,
            next_state,
            reward,
        }
    }

    pub fn is_final(&self) -> bool {
        self.next_state.is_none()
    }
}

/// Fixed capacity ring buffer. Once full, every push overwrites the oldest
/// entry; samples are drawn uniformly without replacement.
#[derive(Debug, Clone)]
pub struct ReplayMemory<T> {
    memory: Vec<T>,
    capacity: usize,
    position: usize,
    rng: StdRng,
}

impl<T> ReplayMemory<T> {
    pub fn new(capacity: usize, seed: u64) -> Result<Self, ReplayError> {
        if capacity == 0 {
            return Err(ReplayError::ZeroCapacity);
        }
        Ok(Self {
            memory: Vec::new(),
            capacity,
            position: 0,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn push(&mut self, item: T) {
        if self.memory.len() < self.capacity {
            self.memory.push(item);
        } else {
            self.memory[self.position] = item;
        }
        self.position = (self.position + 1) % self.capacity;
    }

    pub fn sample(&mut self, batch_size: usize) -> Result<Vec<&T>, ReplayError> {
        if batch_size > self.memory.len() {
            return Err(ReplayError::NotEnoughTransitions {
                requested: batch_size,
                available: self.memory.len(),
            });
        }
        let indexes = index::sample(&mut self.rng, self.memory.len(), batch_size);
        Ok(indexes.iter().map(|i| &self.memory[i]).collect())
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.memory.clear();
        self.position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(
            ReplayMemory::<u32>::new(0, 1).unwrap_err(),
            ReplayError::ZeroCapacity
        );
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut memory = ReplayMemory::new(5, 1).unwrap();
        for i in 0..23 {
            memory.push(i);
            assert!(memory.len() <= 5);
        }
        assert_eq!(memory.len(), 5);
        assert_eq!(memory.capacity(), 5);
    }

    #[test]
    fn oldest_entries_are_overwritten_in_insertion_order() {
        let mut memory = ReplayMemory::new(3, 1).unwrap();
        for i in 0..5 {
            memory.push(i);
        }
        // slot 0 <- 3, slot 1 <- 4, slot 2 still 2
        assert_eq!(memory.memory, vec![3, 4, 2]);
        memory.push(5);
        assert_eq!(memory.memory, vec![3, 4, 5]);
    }

    #[test]
    fn sampling_more_than_stored_fails() {
        let mut memory = ReplayMemory::new(10, 1).unwrap();
        memory.push(1);
        memory.push(2);
        assert_eq!(
            memory.sample(3).unwrap_err(),
            ReplayError::NotEnoughTransitions {
                requested: 3,
                available: 2
            }
        );
    }

    #[test]
    fn samples_are_distinct() {
        let mut memory = ReplayMemory::new(100, 7).unwrap();
        for i in 0..100 {
            memory.push(i);
        }
        for _ in 0..20 {
            let batch = memory.sample(32).unwrap();
            let unique: HashSet<_> = batch.iter().copied().collect();
            assert_eq!(unique.len(), 32);
        }
        let all = memory.sample(100).unwrap();
        let unique: HashSet<_> = all.into_iter().copied().collect();
        assert_eq!(unique.len(), 100);
    }

    #[test]
    fn same_seed_same_samples() {
        let mut a = ReplayMemory::new(50, 3).unwrap();
        let mut b = ReplayMemory::new(50, 3).unwrap();
        for i in 0..50 {
            a.push(i);
            b.push(i);
        }
        let sa: Vec<i32> = a.sample(10).unwrap().into_iter().copied().collect();
        let sb: Vec<i32> = b.sample(10).unwrap().into_iter().copied().collect();
        assert_eq!(sa, sb);
    }

    #[test]
    fn clear_empties_the_memory() {
        let mut memory = ReplayMemory::new(4, 1).unwrap();
        memory.push(1);
        memory.clear();
        assert!(memory.is_empty());
        memory.push(9);
        assert_eq!(memory.memory, vec![9]);
    }

    #[test]
    fn final_transition_has_no_next_state() {
        let state = Array3::zeros((1, 2, 2));
        let t = Transition::new(state.clone(), 1, None, 1.0);
        assert!(t.is_final());
        let t = Transition::new(state.clone(), 0, Some(state), 0.0);
        assert!(!t.is_final());
    }
}
