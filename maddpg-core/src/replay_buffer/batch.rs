//! Transitions and batches.
use crate::{JointAct, JointObs};

/// One recorded environment step of all agents.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    /// Joint observation before the step.
    pub obs: JointObs,

    /// Joint action taken.
    pub act: JointAct,

    /// Reward of each agent.
    pub reward: Vec<f32>,

    /// Joint observation after the step.
    pub next_obs: JointObs,

    /// Terminal flag of each agent.
    pub is_terminated: Vec<i8>,

    /// Flag denoting if the episode is truncated at this step.
    pub is_truncated: bool,
}

impl Transition {
    /// Returns the number of agents.
    pub fn n_agents(&self) -> usize {
        self.obs.len()
    }
}

/// Sampled transitions of one agent.
///
/// Vectors are flattened in row-major order, i.e., `obs` has
/// `len() * obs_dim` elements.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentBatch {
    /// Observations.
    pub obs: Vec<f32>,

    /// Actions.
    pub act: Vec<f32>,

    /// Next observations.
    pub next_obs: Vec<f32>,

    /// Rewards.
    pub reward: Vec<f32>,

    /// Terminal flags.
    pub is_terminated: Vec<i8>,

    /// Observation dimension.
    pub obs_dim: usize,

    /// Action dimension.
    pub act_dim: usize,
}

impl AgentBatch {
    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.reward.len()
    }

    /// Returns `true` if the batch has no sample.
    pub fn is_empty(&self) -> bool {
        self.reward.is_empty()
    }

    /// Returns the observation of the `k`-th sample.
    pub fn obs_row(&self, k: usize) -> &[f32] {
        &self.obs[k * self.obs_dim..(k + 1) * self.obs_dim]
    }

    /// Returns the action of the `k`-th sample.
    pub fn act_row(&self, k: usize) -> &[f32] {
        &self.act[k * self.act_dim..(k + 1) * self.act_dim]
    }

    /// Returns the next observation of the `k`-th sample.
    pub fn next_obs_row(&self, k: usize) -> &[f32] {
        &self.next_obs[k * self.obs_dim..(k + 1) * self.obs_dim]
    }
}

/// Sampled joint transitions, aligned by sample index across agents.
#[derive(Clone, Debug, PartialEq)]
pub struct JointBatch {
    /// Per-agent batches in agent-index order.
    pub agents: Vec<AgentBatch>,

    /// Buffer slots of the samples.
    pub ix_sample: Vec<usize>,
}

impl JointBatch {
    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.ix_sample.len()
    }

    /// Returns `true` if the batch has no sample.
    pub fn is_empty(&self) -> bool {
        self.ix_sample.is_empty()
    }

    /// Returns the number of agents.
    pub fn n_agents(&self) -> usize {
        self.agents.len()
    }

    /// Returns the batch of the `i`-th agent.
    pub fn agent(&self, i: usize) -> &AgentBatch {
        &self.agents[i]
    }
}
