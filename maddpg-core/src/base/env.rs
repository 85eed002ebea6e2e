//! Environment.
use super::{ActionSpace, Step};
use crate::record::Record;
use anyhow::Result;

/// Observations of all agents, in agent-index order.
pub type JointObs = Vec<Vec<f32>>;

/// Actions of all agents, in agent-index order.
pub type JointAct = Vec<Vec<f32>>;

/// Represents a multi-agent environment.
///
/// All agents act at the same time. The number of agents, the observation
/// dimension and the action space of each agent are fixed after [`Env::build`].
pub trait Env {
    /// Configurations.
    type Config: Clone;

    /// Builds an environment with a given random seed.
    fn build(config: &Self::Config, seed: i64) -> Result<Self>
    where
        Self: Sized;

    /// Returns the observation dimension of each agent.
    fn obs_dims(&self) -> Vec<usize>;

    /// Returns the action space of each agent.
    fn act_spaces(&self) -> Vec<ActionSpace>;

    /// Returns the number of agents.
    fn n_agents(&self) -> usize {
        self.obs_dims().len()
    }

    /// Performes an environment step.
    ///
    /// `act[i]` is the action of the `i`-th agent.
    fn step(&mut self, act: &JointAct) -> Result<(Step, Record)>;

    /// Resets the environment and returns the initial joint observation.
    fn reset(&mut self) -> Result<JointObs>;

    /// Resets the environment with a given index.
    ///
    /// The index is used in an arbitrary way. For example, it can be used as a random seed,
    /// which is useful when evaluation of a trained agent.
    fn reset_with_index(&mut self, ix: usize) -> Result<JointObs>;
}
