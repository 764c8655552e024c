use {
    candle_core::{
        Device,
        Result,
        Tensor,
    },
    rand::{
        seq::index,
        thread_rng,
    },
    std::collections::VecDeque,
    unzip_n::unzip_n,
};

unzip_n!(5);

/// A transition in the replay memory.
///
/// # Fields
///
/// * `observation` - The flattened observation the action was taken in.
/// * `action` - The action, as produced by the actor (so in `[-1, 1]`).
/// * `reward` - The (scaled) reward.
/// * `next_observation` - The flattened observation after the step.
/// * `done` - Whether the episode terminated with this step. Truncation by a
///   time limit does not count, the next state still has a value.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub observation: Vec<f64>,
    pub action: Vec<f64>,
    pub reward: f64,
    pub next_observation: Vec<f64>,
    pub done: bool,
}

/// A training batch, one row per sampled transition.
#[derive(Clone, Debug)]
pub struct Batch {
    pub observations: Tensor,
    pub actions: Tensor,
    pub rewards: Tensor,
    pub next_observations: Tensor,
    pub terminals: Tensor,
}

/// Replay memory for off-policy training.
///
/// A fixed-capacity ring buffer: once `limit` transitions are stored, every
/// new one evicts the oldest.
#[derive(Clone)]
pub struct Memory {
    buffer: VecDeque<Transition>,
    limit: usize,
    observation_shape: Vec<usize>,
    action_shape: Vec<usize>,
}
impl Memory {
    pub fn new(
        limit: usize,
        action_shape: &[usize],
        observation_shape: &[usize],
    ) -> Self {
        Self {
            buffer: VecDeque::with_capacity(limit),
            limit,
            observation_shape: observation_shape.to_vec(),
            action_shape: action_shape.to_vec(),
        }
    }

    /// The number of stored transitions.
    pub fn nb_entries(&self) -> usize {
        self.buffer.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Iterate over the stored transitions, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.buffer.iter()
    }

    /// Append a transition, evicting the oldest one when the memory is full.
    pub fn append(
        &mut self,
        transition: Transition,
    ) {
        if self.limit == 0 {
            return;
        }
        if self.buffer.len() == self.limit {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    /// Pick `batch_size` distinct transitions uniformly at random.
    ///
    /// When fewer than `batch_size` transitions are stored, `None` is returned.
    pub fn sample_transitions(
        &self,
        batch_size: usize,
    ) -> Option<Vec<&Transition>> {
        if batch_size == 0 || self.buffer.len() < batch_size {
            return None;
        }
        let indices = index::sample(&mut thread_rng(), self.buffer.len(), batch_size);
        Some(indices.iter().map(|i| &self.buffer[i]).collect())
    }

    /// Sample a random batch of transitions as tensors.
    ///
    /// When fewer than `batch_size` transitions are stored, `None` is returned.
    pub fn sample(
        &self,
        batch_size: usize,
        device: &Device,
    ) -> Result<Option<Batch>> {
        let transitions = match self.sample_transitions(batch_size) {
            Some(transitions) => transitions,
            None => return Ok(None),
        };

        let (observations, actions, rewards, next_observations, terminals) = transitions
            .into_iter()
            .map(|t| (
                t.observation.clone(),
                t.action.clone(),
                t.reward,
                t.next_observation.clone(),
                if t.done { 1.0 } else { 0.0 },
            ))
            .unzip_n_vec();

        let mut observation_dims = vec![batch_size];
        observation_dims.extend(&self.observation_shape);
        let mut action_dims = vec![batch_size];
        action_dims.extend(&self.action_shape);

        Ok(Some(Batch {
            observations: Tensor::from_vec(observations.concat(), observation_dims.as_slice(), device)?,
            actions: Tensor::from_vec(actions.concat(), action_dims.as_slice(), device)?,
            rewards: Tensor::from_vec(rewards, (batch_size, 1), device)?,
            next_observations: Tensor::from_vec(next_observations.concat(), observation_dims.as_slice(), device)?,
            terminals: Tensor::from_vec(terminals, (batch_size, 1), device)?,
        }))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn transition(reward: f64) -> Transition {
        Transition {
            observation: vec![reward, -reward],
            action: vec![0.0],
            reward,
            next_observation: vec![reward + 1.0, -reward - 1.0],
            done: false,
        }
    }

    #[test]
    fn oldest_transition_is_evicted_first() {
        let capacity = 5;
        let mut memory = Memory::new(capacity, &[1], &[2]);
        for r in 0..=capacity {
            memory.append(transition(r as f64));
        }

        assert_eq!(memory.nb_entries(), capacity);
        let rewards: Vec<f64> = memory.iter().map(|t| t.reward).collect();
        assert_eq!(rewards, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn full_buffer_samples_only_surviving_rewards() -> Result<()> {
        let mut memory = Memory::new(3, &[1], &[2]);
        for r in [1.0, 2.0, 3.0, 4.0] {
            memory.append(transition(r));
        }

        for _ in 0..100 {
            let batch = memory.sample(3, &Device::Cpu)?.unwrap();
            let mut rewards: Vec<f64> = batch.rewards.flatten_all()?.to_vec1()?;
            rewards.sort_by(f64::total_cmp);
            assert_eq!(rewards, vec![2.0, 3.0, 4.0]);
        }
        Ok(())
    }

    #[test]
    fn underfilled_memory_yields_no_batch() -> Result<()> {
        let mut memory = Memory::new(10, &[1], &[2]);
        assert!(memory.sample(1, &Device::Cpu)?.is_none());
        memory.append(transition(1.0));
        assert!(memory.sample(2, &Device::Cpu)?.is_none());
        assert!(memory.sample(1, &Device::Cpu)?.is_some());
        Ok(())
    }

    #[test]
    fn batch_tensors_carry_observation_shape() -> Result<()> {
        let mut memory = Memory::new(10, &[1], &[2]);
        for r in 0..4 {
            memory.append(transition(r as f64));
        }
        let batch = memory.sample(4, &Device::Cpu)?.unwrap();
        assert_eq!(batch.observations.dims(), &[4, 2]);
        assert_eq!(batch.next_observations.dims(), &[4, 2]);
        assert_eq!(batch.actions.dims(), &[4, 1]);
        assert_eq!(batch.rewards.dims(), &[4, 1]);
        assert_eq!(batch.terminals.dims(), &[4, 1]);
        Ok(())
    }
}
