//! Policy.
use super::{JointAct, JointObs};
use anyhow::Result;
use serde::de::DeserializeOwned;
use std::path::Path;

/// A joint policy of all agents.
///
/// Each agent maps its own observation to its own action. The joint
/// observation is given only for convenience of the caller; an implementation
/// must not feed `obs[j]` into the policy of agent `i != j`.
pub trait Policy {
    /// Sample actions of all agents given their observations.
    fn sample(&mut self, obs: &JointObs) -> Result<JointAct>;
}

/// A configurable object, having type parameter.
pub trait Configurable {
    /// Configuration.
    type Config: Clone + DeserializeOwned;

    /// Builds the object.
    fn build(config: Self::Config) -> Result<Self>
    where
        Self: Sized;

    /// Build the object with the configuration in the yaml file of the given path.
    fn build_from_path(path: impl AsRef<Path>) -> Result<Self>
    where
        Self: Sized,
    {
        let file = std::fs::File::open(path)?;
        let rdr = std::io::BufReader::new(file);
        let config = serde_yaml::from_reader(rdr)?;
        Self::build(config)
    }
}
