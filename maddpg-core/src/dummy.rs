//! This module is used for tests.
use crate::{
    error::MaddpgError,
    record::{Record, RecordValue::Scalar},
    replay_buffer::ReplayBuffer,
    ActionSpace, Agent, Env, ExperienceBufferBase, JointAct, JointObs, Policy, Step,
};
use anyhow::Result;
use std::{fs::File, io::Write, path::Path};

/// Configuration of [`DummyEnv`].
#[derive(Clone, Debug)]
pub struct DummyEnvConfig {
    /// Number of agents.
    pub n_agents: usize,

    /// Observation dimension of every agent.
    pub obs_dim: usize,

    /// Action space of every agent.
    pub act_space: ActionSpace,

    /// Episodes are truncated at this length.
    pub episode_len: usize,
}

impl Default for DummyEnvConfig {
    fn default() -> Self {
        Self {
            n_agents: 2,
            obs_dim: 3,
            act_space: ActionSpace::Discrete(3),
            episode_len: 100,
        }
    }
}

impl DummyEnvConfig {
    /// Sets the number of agents.
    pub fn n_agents(mut self, v: usize) -> Self {
        self.n_agents = v;
        self
    }

    /// Sets the observation dimension.
    pub fn obs_dim(mut self, v: usize) -> Self {
        self.obs_dim = v;
        self
    }

    /// Sets the action space.
    pub fn act_space(mut self, v: ActionSpace) -> Self {
        self.act_space = v;
        self
    }

    /// Sets the episode length.
    pub fn episode_len(mut self, v: usize) -> Self {
        self.episode_len = v;
        self
    }
}

/// Dummy environment.
///
/// The observation of agent `i` at step `t` is filled with `0.1 * (t + i)`.
/// The reward of agent `i` is the first element of its action.
pub struct DummyEnv {
    config: DummyEnvConfig,
    t: usize,
}

impl DummyEnv {
    fn obs(&self) -> JointObs {
        (0..self.config.n_agents)
            .map(|i| vec![0.1 * (self.t + i) as f32; self.config.obs_dim])
            .collect()
    }
}

impl Env for DummyEnv {
    type Config = DummyEnvConfig;

    fn build(config: &Self::Config, _seed: i64) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            t: 0,
        })
    }

    fn obs_dims(&self) -> Vec<usize> {
        vec![self.config.obs_dim; self.config.n_agents]
    }

    fn act_spaces(&self) -> Vec<ActionSpace> {
        vec![self.config.act_space; self.config.n_agents]
    }

    fn step(&mut self, act: &JointAct) -> Result<(Step, Record)> {
        if act.len() != self.config.n_agents {
            return Err(
                MaddpgError::dim_mismatch("number of actions", self.config.n_agents, act.len())
                    .into(),
            );
        }
        let dim = self.config.act_space.dim();
        for (i, a) in act.iter().enumerate() {
            if a.len() != dim {
                return Err(MaddpgError::dim_mismatch(format!("action {}", i), dim, a.len()).into());
            }
        }

        self.t += 1;
        let reward = act.iter().map(|a| a[0]).collect();
        let is_terminated = vec![0; self.config.n_agents];
        let is_truncated = self.t >= self.config.episode_len;
        let step = Step::new(self.obs(), act.clone(), reward, is_terminated, is_truncated);
        let record = Record::from_scalar("dummy_t", self.t as f32);

        Ok((step, record))
    }

    fn reset(&mut self) -> Result<JointObs> {
        self.t = 0;
        Ok(self.obs())
    }

    fn reset_with_index(&mut self, _ix: usize) -> Result<JointObs> {
        self.reset()
    }
}

/// Dummy policy taking the first action (discrete) or the all-ones vector
/// (continuous) for every agent.
pub struct DummyPolicy {
    act_spaces: Vec<ActionSpace>,
}

impl DummyPolicy {
    /// Constructs a dummy policy.
    pub fn new(act_spaces: Vec<ActionSpace>) -> Self {
        Self { act_spaces }
    }
}

impl Policy for DummyPolicy {
    fn sample(&mut self, obs: &JointObs) -> Result<JointAct> {
        if obs.len() != self.act_spaces.len() {
            return Err(MaddpgError::dim_mismatch(
                "number of observations",
                self.act_spaces.len(),
                obs.len(),
            )
            .into());
        }
        Ok(self
            .act_spaces
            .iter()
            .map(|s| match s {
                ActionSpace::Discrete(n) => {
                    let mut a = vec![0.0; *n];
                    a[0] = 1.0;
                    a
                }
                ActionSpace::Continuous(d) => vec![1.0; *d],
            })
            .collect())
    }
}

/// Dummy agent counting optimization steps.
///
/// An optimization step fails with [`MaddpgError::InsufficientData`] while
/// the buffer holds fewer than `min_buffer` transitions.
pub struct DummyAgent {
    policy: DummyPolicy,
    min_buffer: usize,
    n_opts: usize,
    n_opts_attempted: usize,
    fail_at: Option<usize>,
    is_train: bool,
}

impl DummyAgent {
    /// Constructs a dummy agent.
    pub fn new(act_spaces: Vec<ActionSpace>, min_buffer: usize) -> Self {
        Self {
            policy: DummyPolicy::new(act_spaces),
            min_buffer,
            n_opts: 0,
            n_opts_attempted: 0,
            fail_at: None,
            is_train: false,
        }
    }

    /// Makes the `n`-th optimization step fail with [`MaddpgError::NumericInstability`].
    pub fn fail_at(&mut self, n: usize) {
        self.fail_at = Some(n);
    }

    /// Returns the number of successful optimization steps.
    pub fn n_opts(&self) -> usize {
        self.n_opts
    }

    /// Returns the number of attempted optimization steps.
    pub fn n_opts_attempted(&self) -> usize {
        self.n_opts_attempted
    }
}

impl Policy for DummyAgent {
    fn sample(&mut self, obs: &JointObs) -> Result<JointAct> {
        self.policy.sample(obs)
    }
}

impl Agent<ReplayBuffer> for DummyAgent {
    fn train(&mut self) {
        self.is_train = true;
    }

    fn eval(&mut self) {
        self.is_train = false;
    }

    fn is_train(&self) -> bool {
        self.is_train
    }

    fn opt_with_record(&mut self, buffer: &mut ReplayBuffer) -> Result<Record> {
        self.n_opts_attempted += 1;
        if buffer.len() < self.min_buffer {
            return Err(MaddpgError::InsufficientData {
                len: buffer.len(),
                required: self.min_buffer,
            }
            .into());
        }
        if self.fail_at == Some(self.n_opts + 1) {
            return Err(MaddpgError::NumericInstability("dummy_loss".into()).into());
        }
        self.n_opts += 1;
        Ok(Record::from_scalar("dummy_loss", 1.0 / self.n_opts as f32))
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)?;
        let mut file = File::create(path.join("dummy_agent.yaml"))?;
        file.write_all(format!("n_opts: {}\n", self.n_opts).as_bytes())?;
        Ok(())
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path.join("dummy_agent.yaml"))?;
        let value: serde_yaml::Value = serde_yaml::from_reader(file)?;
        self.n_opts = value["n_opts"].as_u64().unwrap_or(0) as usize;
        Ok(())
    }
}
