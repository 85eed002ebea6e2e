//! Ring buffer of joint transitions.
use super::{AgentBatch, JointBatch, ReplayBufferConfig, Transition};
use crate::{error::MaddpgError, ExperienceBufferBase, ReplayBufferBase};
use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Storage of one agent's part of the transitions.
struct AgentStorage {
    obs_dim: usize,
    act_dim: usize,
    obs: Vec<f32>,
    act: Vec<f32>,
    next_obs: Vec<f32>,
    reward: Vec<f32>,
    is_terminated: Vec<i8>,
}

impl AgentStorage {
    fn new(capacity: usize, obs_dim: usize, act_dim: usize) -> Self {
        Self {
            obs_dim,
            act_dim,
            obs: vec![0.0; capacity * obs_dim],
            act: vec![0.0; capacity * act_dim],
            next_obs: vec![0.0; capacity * obs_dim],
            reward: vec![0.0; capacity],
            is_terminated: vec![0; capacity],
        }
    }

    #[inline]
    fn push(
        &mut self,
        i: usize,
        obs: &[f32],
        act: &[f32],
        reward: f32,
        next_obs: &[f32],
        is_terminated: i8,
    ) {
        copy_row(&mut self.obs, i, self.obs_dim, obs);
        copy_row(&mut self.act, i, self.act_dim, act);
        copy_row(&mut self.next_obs, i, self.obs_dim, next_obs);
        self.reward[i] = reward;
        self.is_terminated[i] = is_terminated;
    }

    fn sample(&self, ixs: &[usize]) -> AgentBatch {
        AgentBatch {
            obs: gather_rows(&self.obs, self.obs_dim, ixs),
            act: gather_rows(&self.act, self.act_dim, ixs),
            next_obs: gather_rows(&self.next_obs, self.obs_dim, ixs),
            reward: ixs.iter().map(|&ix| self.reward[ix]).collect(),
            is_terminated: ixs.iter().map(|&ix| self.is_terminated[ix]).collect(),
            obs_dim: self.obs_dim,
            act_dim: self.act_dim,
        }
    }
}

#[inline]
fn copy_row(dest: &mut [f32], i: usize, dim: usize, src: &[f32]) {
    dest[i * dim..(i + 1) * dim].copy_from_slice(src);
}

fn gather_rows(src: &[f32], dim: usize, ixs: &[usize]) -> Vec<f32> {
    let mut out = Vec::with_capacity(ixs.len() * dim);
    for &ix in ixs.iter() {
        out.extend_from_slice(&src[ix * dim..(ix + 1) * dim]);
    }
    out
}

/// Replay buffer shared by all agents.
///
/// Holds at most `capacity` joint transitions. When full, a push overwrites
/// the oldest transition. Sampling is uniform with replacement over the
/// stored transitions, driven by a seeded random number generator.
pub struct ReplayBuffer {
    capacity: usize,

    /// Next slot to be written.
    i: usize,

    size: usize,
    agents: Vec<AgentStorage>,
    is_truncated: Vec<i8>,
    rng: StdRng,
}

impl ReplayBuffer {
    /// Returns the number of agents.
    pub fn n_agents(&self) -> usize {
        self.agents.len()
    }

    /// Returns the capacity of the buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the observation dimension of each agent.
    pub fn obs_dims(&self) -> Vec<usize> {
        self.agents.iter().map(|a| a.obs_dim).collect()
    }

    /// Returns the action dimension of each agent.
    pub fn act_dims(&self) -> Vec<usize> {
        self.agents.iter().map(|a| a.act_dim).collect()
    }

    fn check(&self, tr: &Transition) -> Result<(), MaddpgError> {
        let n = self.n_agents();
        let counts = [
            ("number of observations", tr.obs.len()),
            ("number of actions", tr.act.len()),
            ("number of rewards", tr.reward.len()),
            ("number of next observations", tr.next_obs.len()),
            ("number of terminal flags", tr.is_terminated.len()),
        ];
        for (what, actual) in counts {
            if actual != n {
                return Err(MaddpgError::dim_mismatch(what, n, actual));
            }
        }

        for (i, a) in self.agents.iter().enumerate() {
            if tr.obs[i].len() != a.obs_dim {
                return Err(MaddpgError::dim_mismatch(
                    format!("observation of agent {}", i),
                    a.obs_dim,
                    tr.obs[i].len(),
                ));
            }
            if tr.next_obs[i].len() != a.obs_dim {
                return Err(MaddpgError::dim_mismatch(
                    format!("next observation of agent {}", i),
                    a.obs_dim,
                    tr.next_obs[i].len(),
                ));
            }
            if tr.act[i].len() != a.act_dim {
                return Err(MaddpgError::dim_mismatch(
                    format!("action of agent {}", i),
                    a.act_dim,
                    tr.act[i].len(),
                ));
            }
        }

        Ok(())
    }

    /// Draws `batch_size` slot indices uniformly with replacement.
    ///
    /// Every returned index refers to a stored transition. Returns
    /// [`MaddpgError::InsufficientData`] if the buffer is empty.
    pub fn sample_indices(&mut self, batch_size: usize) -> Result<Vec<usize>, MaddpgError> {
        if self.size == 0 {
            return Err(MaddpgError::InsufficientData {
                len: 0,
                required: batch_size.max(1),
            });
        }
        let size = self.size;
        Ok((0..batch_size)
            .map(|_| self.rng.gen_range(0..size))
            .collect())
    }

    /// Gathers the per-agent arrays of the transitions at the given slots.
    ///
    /// Indices must have been obtained from [`ReplayBuffer::sample_indices`].
    pub fn batch_with_indices(&self, ixs: &[usize]) -> JointBatch {
        JointBatch {
            agents: self.agents.iter().map(|a| a.sample(ixs)).collect(),
            ix_sample: ixs.to_vec(),
        }
    }

    /// Returns all stored transitions, from the oldest to the newest.
    ///
    /// This method should be used with caution on large replay buffers
    /// as it may consume significant memory.
    pub fn whole_batch(&self) -> JointBatch {
        let ixs: Vec<usize> = if self.size < self.capacity {
            (0..self.size).collect()
        } else {
            (self.i..self.capacity).chain(0..self.i).collect()
        };
        self.batch_with_indices(&ixs)
    }

    /// Returns the sum of all rewards of all agents in the buffer.
    pub fn sum_rewards(&self) -> f32 {
        self.agents
            .iter()
            .map(|a| a.reward[..self.size].iter().sum::<f32>())
            .sum()
    }

    /// Returns the number of terminal flags set in the buffer, summed over agents.
    pub fn num_terminated_flags(&self) -> usize {
        self.agents
            .iter()
            .map(|a| {
                a.is_terminated[..self.size]
                    .iter()
                    .filter(|&&d| d != 0)
                    .count()
            })
            .sum()
    }

    /// Returns the number of truncation flags set in the buffer.
    pub fn num_truncated_flags(&self) -> usize {
        self.is_truncated[..self.size]
            .iter()
            .filter(|&&d| d != 0)
            .count()
    }
}

impl ExperienceBufferBase for ReplayBuffer {
    type Item = Transition;

    /// Stores a transition.
    ///
    /// Returns [`MaddpgError::DimensionMismatch`] if the shape of the transition
    /// disagrees with the configured dimensions. The buffer is unchanged in that case.
    fn push(&mut self, tr: Self::Item) -> Result<()> {
        self.check(&tr)?;

        let i = self.i;
        for (k, a) in self.agents.iter_mut().enumerate() {
            a.push(
                i,
                &tr.obs[k],
                &tr.act[k],
                tr.reward[k],
                &tr.next_obs[k],
                tr.is_terminated[k],
            );
        }
        self.is_truncated[i] = tr.is_truncated as i8;

        self.i = (self.i + 1) % self.capacity;
        self.size = (self.size + 1).min(self.capacity);

        Ok(())
    }

    fn len(&self) -> usize {
        self.size
    }
}

impl ReplayBufferBase for ReplayBuffer {
    type Config = ReplayBufferConfig;
    type Batch = JointBatch;

    fn build(config: &Self::Config) -> Result<Self> {
        if config.capacity == 0 {
            anyhow::bail!("Capacity of the replay buffer must be positive");
        }
        if config.obs_dims.len() != config.act_dims.len() {
            return Err(MaddpgError::dim_mismatch(
                "number of action dimensions",
                config.obs_dims.len(),
                config.act_dims.len(),
            )
            .into());
        }

        let capacity = config.capacity;
        let agents = config
            .obs_dims
            .iter()
            .zip(config.act_dims.iter())
            .map(|(&obs_dim, &act_dim)| AgentStorage::new(capacity, obs_dim, act_dim))
            .collect();

        Ok(Self {
            capacity,
            i: 0,
            size: 0,
            agents,
            is_truncated: vec![0; capacity],
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    fn batch(&mut self, size: usize) -> Result<Self::Batch> {
        let ixs = self.sample_indices(size)?;
        Ok(self.batch_with_indices(&ixs))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn transition(v: f32) -> Transition {
        Transition {
            obs: vec![vec![v; 2], vec![v; 3]],
            act: vec![vec![v; 1], vec![v; 2]],
            reward: vec![v, 2.0 * v],
            next_obs: vec![vec![v + 0.5; 2], vec![v + 0.5; 3]],
            is_terminated: vec![0, 0],
            is_truncated: false,
        }
    }

    fn buffer(capacity: usize) -> Result<ReplayBuffer> {
        let config = ReplayBufferConfig::default()
            .capacity(capacity)
            .dims(vec![2, 3], vec![1, 2]);
        ReplayBuffer::build(&config)
    }

    #[test]
    fn test_ring_eviction() -> Result<()> {
        let mut buffer = buffer(3)?;
        for v in [1.0, 2.0, 3.0, 4.0] {
            buffer.push(transition(v))?;
        }
        assert_eq!(buffer.len(), 3);

        let batch = buffer.whole_batch();
        assert_eq!(batch.agent(0).reward, vec![2.0, 3.0, 4.0]);
        assert_eq!(batch.agent(1).reward, vec![4.0, 6.0, 8.0]);
        assert_eq!(batch.agent(1).obs_row(0), &[2.0, 2.0, 2.0]);

        Ok(())
    }

    #[test]
    fn test_sample_indices_in_range() -> Result<()> {
        let mut buffer = buffer(100)?;
        for v in 0..7 {
            buffer.push(transition(v as f32))?;
        }

        let ixs = buffer.sample_indices(1000)?;
        assert_eq!(ixs.len(), 1000);
        assert!(ixs.iter().all(|&ix| ix < 7));

        let batch = buffer.batch_with_indices(&ixs);
        for k in 0..batch.len() {
            let r = batch.agent(0).reward[k];
            assert_eq!(batch.agent(0).obs_row(k), &[r, r]);
            assert_eq!(batch.agent(1).reward[k], 2.0 * r);
            assert_eq!(batch.agent(1).next_obs_row(k), &[r + 0.5; 3]);
        }

        Ok(())
    }

    #[test]
    fn test_sampling_is_seeded() -> Result<()> {
        let mut b1 = buffer(50)?;
        let mut b2 = buffer(50)?;
        for v in 0..20 {
            b1.push(transition(v as f32))?;
            b2.push(transition(v as f32))?;
        }
        assert_eq!(b1.sample_indices(32)?, b2.sample_indices(32)?);

        Ok(())
    }

    #[test]
    fn test_empty_buffer() -> Result<()> {
        let mut buffer = buffer(10)?;
        match buffer.sample_indices(4) {
            Err(MaddpgError::InsufficientData { len, .. }) => assert_eq!(len, 0),
            _ => panic!("expected InsufficientData"),
        }
        assert!(buffer.batch(4).is_err());

        Ok(())
    }

    #[test]
    fn test_push_dimension_mismatch() -> Result<()> {
        let mut buffer = buffer(10)?;
        let mut tr = transition(1.0);
        tr.obs[1] = vec![0.0; 4];

        let err = buffer.push(tr).unwrap_err();
        assert_eq!(
            err.downcast_ref::<MaddpgError>(),
            Some(&MaddpgError::dim_mismatch("observation of agent 1", 3, 4))
        );
        assert_eq!(buffer.len(), 0);

        Ok(())
    }

    #[test]
    fn test_diagnostics() -> Result<()> {
        let mut buffer = buffer(10)?;
        let mut tr = transition(1.0);
        tr.is_terminated = vec![1, 0];
        tr.is_truncated = true;
        buffer.push(tr)?;
        buffer.push(transition(2.0))?;

        assert_eq!(buffer.sum_rewards(), 1.0 + 2.0 + 2.0 + 4.0);
        assert_eq!(buffer.num_terminated_flags(), 1);
        assert_eq!(buffer.num_truncated_flags(), 1);

        Ok(())
    }
}
