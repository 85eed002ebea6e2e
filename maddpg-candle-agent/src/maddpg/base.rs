use super::{AgentTrainer, MaddpgConfig};
use anyhow::Result;
use log::trace;
use maddpg_core::{
    error::MaddpgError,
    record::{Record, RecordValue::Scalar},
    replay_buffer::ReplayBuffer,
    Agent, Configurable, ExperienceBufferBase, JointAct, JointObs, Policy,
};
use std::path::Path;

/// MADDPG agent, a set of [`AgentTrainer`]s sharing a replay buffer.
pub struct Maddpg {
    trainers: Vec<AgentTrainer>,
    obs_dims: Vec<usize>,
    act_dims: Vec<usize>,
    batch_size: usize,
    min_buffer_multiplier: usize,
    train: bool,
    n_opts: usize,
}

impl Maddpg {
    /// Returns the number of agents.
    pub fn n_agents(&self) -> usize {
        self.trainers.len()
    }

    /// Returns the trainer of the `i`-th agent.
    pub fn trainer(&self, i: usize) -> &AgentTrainer {
        &self.trainers[i]
    }

    /// Returns the number of optimization steps.
    pub fn n_opts(&self) -> usize {
        self.n_opts
    }

    /// Returns the minimum number of transitions for an optimization step.
    pub fn min_buffer_len(&self) -> usize {
        self.batch_size * self.min_buffer_multiplier
    }

    /// Deterministic joint action, each agent acting on its own observation.
    pub fn act(&self, obs: &JointObs) -> Result<JointAct> {
        self.check_obs(obs)?;
        self.trainers
            .iter()
            .zip(obs.iter())
            .map(|(t, o)| t.act(o))
            .collect()
    }

    fn check_obs(&self, obs: &JointObs) -> Result<()> {
        if obs.len() != self.n_agents() {
            return Err(
                MaddpgError::dim_mismatch("number of observations", self.n_agents(), obs.len())
                    .into(),
            );
        }
        Ok(())
    }

    fn check_buffer(&self, buffer: &ReplayBuffer) -> Result<()> {
        for (what, expected, actual) in [
            ("observation dimensions", &self.obs_dims, buffer.obs_dims()),
            ("action dimensions", &self.act_dims, buffer.act_dims()),
        ] {
            if expected.len() != actual.len() {
                return Err(MaddpgError::dim_mismatch(
                    format!("number of {} in the buffer", what),
                    expected.len(),
                    actual.len(),
                )
                .into());
            }
            for (j, (e, a)) in expected.iter().zip(actual.iter()).enumerate() {
                if e != a {
                    return Err(MaddpgError::dim_mismatch(
                        format!("{} of agent {} in the buffer", what, j),
                        *e,
                        *a,
                    )
                    .into());
                }
            }
        }
        Ok(())
    }

    fn opt_(&mut self, buffer: &mut ReplayBuffer) -> Result<Record> {
        let required = self.min_buffer_len().max(1);
        if buffer.len() < required {
            return Err(MaddpgError::InsufficientData {
                len: buffer.len(),
                required,
            }
            .into());
        }
        self.check_buffer(buffer)?;

        trace!("Sample a batch shared by all agents");
        let ixs = buffer.sample_indices(self.batch_size)?;
        let batch = buffer.batch_with_indices(&ixs);

        trace!("Compute target actions");
        let next_tgt_acts = self
            .trainers
            .iter()
            .enumerate()
            .map(|(j, t)| t.target_act_batch(batch.agent(j)))
            .collect::<Result<Vec<_>>>()?;

        let mut record = Record::empty();
        for (i, trainer) in self.trainers.iter_mut().enumerate() {
            let record_i = trainer.learn(&batch, &next_tgt_acts)?;
            record.merge_inplace(record_i.with_prefix(&format!("agent_{}_", i)));
        }
        self.n_opts += 1;
        record.insert("n_opts", Scalar(self.n_opts as f32));

        Ok(record)
    }
}

impl Configurable for Maddpg {
    type Config = MaddpgConfig;

    /// Constructs [`Maddpg`] agent.
    fn build(config: Self::Config) -> Result<Self> {
        config.check()?;
        let device = candle_core::Device::try_from(config.device)?;
        let trainers = (0..config.n_agents())
            .map(|i| AgentTrainer::build(i, &config, &device))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            trainers,
            obs_dims: config.obs_dims.clone(),
            act_dims: config.act_dims(),
            batch_size: config.batch_size,
            min_buffer_multiplier: config.min_buffer_multiplier,
            train: false,
            n_opts: 0,
        })
    }
}

impl Policy for Maddpg {
    /// Samples joint action.
    ///
    /// In training mode, each agent takes an exploratory action. Otherwise,
    /// each agent takes its deterministic action.
    fn sample(&mut self, obs: &JointObs) -> Result<JointAct> {
        if !self.train {
            return self.act(obs);
        }
        self.check_obs(obs)?;
        self.trainers
            .iter_mut()
            .zip(obs.iter())
            .map(|(t, o)| t.sample(o))
            .collect()
    }
}

impl Agent<ReplayBuffer> for Maddpg {
    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }

    fn opt_with_record(&mut self, buffer: &mut ReplayBuffer) -> Result<Record> {
        self.opt_(buffer)
    }

    /// Saves the parameters of agent `i` in `path/agent_{i}`.
    fn save_params(&self, path: &Path) -> Result<()> {
        for (i, trainer) in self.trainers.iter().enumerate() {
            trainer.save(&path.join(format!("agent_{}", i)))?;
        }
        Ok(())
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        for (i, trainer) in self.trainers.iter_mut().enumerate() {
            trainer.load(&path.join(format!("agent_{}", i)))?;
        }
        Ok(())
    }
}
