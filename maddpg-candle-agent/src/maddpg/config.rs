//! Configuration of MADDPG agent.
use crate::{opt::OptimizerConfig, Device};
use anyhow::Result;
use maddpg_core::{error::MaddpgError, ActionSpace};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Maddpg`](super::Maddpg).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct MaddpgConfig {
    /// Observation dimension of each agent.
    pub obs_dims: Vec<usize>,

    /// Action space of each agent.
    pub act_spaces: Vec<ActionSpace>,

    /// Number of units in the two hidden layers of actors and critics.
    pub num_units: usize,

    /// Configuration of the optimizers of actors and critics.
    pub opt_config: OptimizerConfig,

    /// Discount factor.
    pub gamma: f64,

    /// Soft update coefficient of target networks.
    pub tau: f64,

    /// Batch size for training.
    pub batch_size: usize,

    /// An optimization step requires `batch_size * min_buffer_multiplier`
    /// transitions in the replay buffer.
    pub min_buffer_multiplier: usize,

    /// Coefficient of the regularizer on the actor outputs.
    pub actor_reg: f64,

    /// Maximum global norm of gradients. `None` disables clipping.
    pub grad_norm_clip: Option<f64>,

    /// Standard deviation of exploration noise for continuous actions.
    pub exploration_std: f64,

    /// If `local_q_func[i]` is `true`, the critic of agent `i` takes its own
    /// observation and action only (DDPG). Missing entries are `false`.
    pub local_q_func: Vec<bool>,

    /// Random seed for parameter initialization and exploration.
    pub seed: u64,

    /// Device for actor/critic models.
    pub device: Device,
}

impl Default for MaddpgConfig {
    fn default() -> Self {
        Self {
            obs_dims: vec![],
            act_spaces: vec![],
            num_units: 64,
            opt_config: OptimizerConfig::Adam { lr: 1e-2 },
            gamma: 0.95,
            tau: 0.01,
            batch_size: 1024,
            min_buffer_multiplier: 25,
            actor_reg: 1e-3,
            grad_norm_clip: Some(0.5),
            exploration_std: 0.1,
            local_q_func: vec![],
            seed: 42,
            device: Device::Cpu,
        }
    }
}

impl MaddpgConfig {
    /// Sets the observation dimensions and action spaces of the agents.
    pub fn agents(mut self, obs_dims: Vec<usize>, act_spaces: Vec<ActionSpace>) -> Self {
        self.obs_dims = obs_dims;
        self.act_spaces = act_spaces;
        self
    }

    /// Sets the number of hidden units.
    pub fn num_units(mut self, v: usize) -> Self {
        self.num_units = v;
        self
    }

    /// Sets the optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Sets the learning rate.
    pub fn lr(mut self, v: f64) -> Self {
        self.opt_config = self.opt_config.learning_rate(v);
        self
    }

    /// Sets the discount factor.
    pub fn gamma(mut self, v: f64) -> Self {
        self.gamma = v;
        self
    }

    /// Sets the soft update coefficient.
    pub fn tau(mut self, v: f64) -> Self {
        self.tau = v;
        self
    }

    /// Sets the batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Sets the multiplier of the batch size giving the minimum number of transitions.
    pub fn min_buffer_multiplier(mut self, v: usize) -> Self {
        self.min_buffer_multiplier = v;
        self
    }

    /// Sets the coefficient of the actor regularizer.
    pub fn actor_reg(mut self, v: f64) -> Self {
        self.actor_reg = v;
        self
    }

    /// Sets the maximum gradient norm.
    pub fn grad_norm_clip(mut self, v: Option<f64>) -> Self {
        self.grad_norm_clip = v;
        self
    }

    /// Sets the standard deviation of exploration noise.
    pub fn exploration_std(mut self, v: f64) -> Self {
        self.exploration_std = v;
        self
    }

    /// Sets which agents use local critics.
    pub fn local_q_func(mut self, v: Vec<bool>) -> Self {
        self.local_q_func = v;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Sets the device.
    pub fn device(mut self, v: Device) -> Self {
        self.device = v;
        self
    }

    /// Returns the number of agents.
    pub fn n_agents(&self) -> usize {
        self.obs_dims.len()
    }

    /// Returns the action dimension of each agent.
    pub fn act_dims(&self) -> Vec<usize> {
        self.act_spaces.iter().map(|s| s.dim()).collect()
    }

    /// Returns `true` if the critic of the `i`-th agent is local.
    pub fn is_local_q_func(&self, i: usize) -> bool {
        self.local_q_func.get(i).copied().unwrap_or(false)
    }

    /// Checks the ranges of the hyperparameters.
    ///
    /// `batch_size` must be positive, `tau` in `(0, 1]`, `gamma` in `[0, 1]`
    /// and `exploration_std` non-negative.
    pub fn check(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(MaddpgError::InvalidConfig(msg).into()) };
        if self.batch_size == 0 {
            return invalid("batch_size must be positive".into());
        }
        if !(self.tau > 0.0 && self.tau <= 1.0) {
            return invalid(format!("tau must be in (0, 1], got {}", self.tau));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return invalid(format!("gamma must be in [0, 1], got {}", self.gamma));
        }
        if self.exploration_std.is_nan() || self.exploration_std < 0.0 {
            return invalid(format!(
                "exploration_std must be non-negative, got {}",
                self.exploration_std
            ));
        }
        Ok(())
    }

    /// Loads [`MaddpgConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`MaddpgConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_serde_maddpg_config() -> Result<()> {
        let config = MaddpgConfig::default()
            .agents(vec![18; 3], vec![ActionSpace::Discrete(5); 3])
            .lr(1e-3)
            .local_q_func(vec![true, false, false]);

        let dir = TempDir::new("maddpg_config")?;
        let path = dir.path().join("maddpg_config.yaml");

        config.save(&path)?;
        let config_ = MaddpgConfig::load(&path)?;
        assert_eq!(config, config_);
        assert_eq!(config_.opt_config, OptimizerConfig::Adam { lr: 1e-3 });
        assert!(config_.is_local_q_func(0));
        assert!(!config_.is_local_q_func(2));

        Ok(())
    }

    fn is_invalid_config(config: &MaddpgConfig) -> bool {
        matches!(
            config.check().map_err(|e| e.downcast::<MaddpgError>()),
            Err(Ok(MaddpgError::InvalidConfig(_)))
        )
    }

    #[test]
    fn test_check() {
        let config = MaddpgConfig::default().agents(vec![4], vec![ActionSpace::Discrete(3)]);
        assert!(config.check().is_ok());
        assert!(config.clone().tau(1.0).gamma(0.0).exploration_std(0.0).check().is_ok());

        assert!(is_invalid_config(&config.clone().batch_size(0)));
        assert!(is_invalid_config(&config.clone().tau(0.0)));
        assert!(is_invalid_config(&config.clone().tau(1.5)));
        assert!(is_invalid_config(&config.clone().tau(f64::NAN)));
        assert!(is_invalid_config(&config.clone().gamma(-0.1)));
        assert!(is_invalid_config(&config.clone().gamma(1.01)));
        assert!(is_invalid_config(&config.clone().exploration_std(-1.0)));
    }
}
