use std::collections::VecDeque;

use rand::Rng;
use rand::seq::index;

use crate::action::Action;

/// One step of experience.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub state: Vec<f32>,
    pub action: Action,
    pub reward: f32,
    pub next_state: Vec<f32>,
    pub done: bool,
}

/// Bounded FIFO store of transitions; the oldest entry is evicted once full.
#[derive(Clone, Debug)]
pub struct ReplayBuffer {
    capacity: usize,
    entries: VecDeque<Transition>,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(4096)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, transition: Transition) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(transition);
    }

    /// `k` distinct transitions chosen uniformly, or none when fewer than
    /// `k` are stored.
    pub fn sample<R: Rng>(&self, k: usize, rng: &mut R) -> Vec<Transition> {
        if k == 0 || self.entries.len() < k {
            return Vec::new();
        }
        index::sample(rng, self.entries.len(), k)
            .into_iter()
            .map(|i| self.entries[i].clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn transition(tag: f32) -> Transition {
        Transition {
            state: vec![tag],
            action: Action::new([0.0; 4]),
            reward: tag,
            next_state: vec![tag + 1.0],
            done: false,
        }
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut buffer = ReplayBuffer::new(3);
        for tag in 0..5 {
            buffer.push(transition(tag as f32));
        }
        assert_eq!(buffer.len(), 3);
        let rewards: Vec<f32> = buffer.iter().map(|t| t.reward).collect();
        assert_eq!(rewards, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn sample_returns_distinct_entries() {
        let mut buffer = ReplayBuffer::new(100);
        for tag in 0..50 {
            buffer.push(transition(tag as f32));
        }
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let batch = buffer.sample(32, &mut rng);
            assert_eq!(batch.len(), 32);
            let mut rewards: Vec<i32> = batch.iter().map(|t| t.reward as i32).collect();
            rewards.sort_unstable();
            rewards.dedup();
            assert_eq!(rewards.len(), 32);
        }
    }

    #[test]
    fn sample_larger_than_contents_is_empty() {
        let mut buffer = ReplayBuffer::new(10);
        buffer.push(transition(1.0));
        let mut rng = StdRng::seed_from_u64(0);
        assert!(buffer.sample(2, &mut rng).is_empty());
        assert_eq!(buffer.sample(1, &mut rng).len(), 1);
    }

    #[test]
    fn full_buffer_sample_is_a_permutation() {
        let mut buffer = ReplayBuffer::new(8);
        for tag in 0..8 {
            buffer.push(transition(tag as f32));
        }
        let mut rng = StdRng::seed_from_u64(9);
        let mut rewards: Vec<i32> = buffer.sample(8, &mut rng).iter().map(|t| t.reward as i32).collect();
        rewards.sort_unstable();
        assert_eq!(rewards, (0..8).collect::<Vec<_>>());
    }
}
