//! Trainer of a single agent.
use super::{Actor, Critic, MaddpgConfig};
use crate::util::{check_finite, export_params, import_params, n_params};
use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use candle_nn::loss::mse;
use log::trace;
use maddpg_core::{
    error::MaddpgError,
    record::{Record, RecordValue::Scalar},
    replay_buffer::{AgentBatch, JointBatch},
    ActionSpace,
};
use rand::{rngs::StdRng, SeedableRng};
use std::{fs, path::Path};

/// Returns the regression target of the critic,
/// `y = r + gamma * (1 - terminal) * q_next`.
///
/// All tensors have shape `(batch_size,)`.
pub fn critic_target(
    reward: &Tensor,
    is_terminated: &Tensor,
    q_next: &Tensor,
    gamma: f64,
) -> Result<Tensor> {
    let not_terminated = is_terminated.affine(-1.0, 1.0)?;
    let next_value = not_terminated.mul(q_next)?.affine(gamma, 0.)?;
    Ok(reward.add(&next_value)?)
}

/// Trains the actor and the critic of the `index`-th agent.
pub struct AgentTrainer {
    index: usize,
    obs_dims: Vec<usize>,
    act_dims: Vec<usize>,
    local_q_func: bool,
    actor: Actor,
    critic: Critic,
    gamma: f64,
    actor_reg: f64,
    grad_norm_clip: Option<f64>,
    exploration_std: f64,

    /// Used for exploration noise and Gumbel-softmax samples.
    rng: StdRng,

    n_opts: usize,
    device: Device,
}

impl AgentTrainer {
    /// Constructs the trainer of the `index`-th agent.
    ///
    /// The random number generator is seeded with `config.seed + index`.
    pub fn build(index: usize, config: &MaddpgConfig, device: &Device) -> Result<Self> {
        config.check()?;
        let n_agents = config.n_agents();
        if config.act_spaces.len() != n_agents {
            return Err(MaddpgError::dim_mismatch(
                "number of action spaces",
                n_agents,
                config.act_spaces.len(),
            )
            .into());
        }
        if index >= n_agents {
            anyhow::bail!("Agent index {} out of range ({} agents)", index, n_agents);
        }

        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(index as u64));
        let obs_dims = config.obs_dims.clone();
        let act_dims = config.act_dims();
        let local_q_func = config.is_local_q_func(index);
        let (q_obs_dim, q_act_dim) = match local_q_func {
            true => (obs_dims[index], act_dims[index]),
            false => (obs_dims.iter().sum(), act_dims.iter().sum()),
        };

        let actor = Actor::build(
            obs_dims[index],
            config.act_spaces[index],
            config.num_units,
            &config.opt_config,
            config.tau,
            device,
            &mut rng,
        )?;
        let critic = Critic::build(
            q_obs_dim,
            q_act_dim,
            config.num_units,
            &config.opt_config,
            config.tau,
            device,
            &mut rng,
        )?;

        Ok(Self {
            index,
            obs_dims,
            act_dims,
            local_q_func,
            actor,
            critic,
            gamma: config.gamma,
            actor_reg: config.actor_reg,
            grad_norm_clip: config.grad_norm_clip,
            exploration_std: config.exploration_std,
            rng,
            n_opts: 0,
            device: device.clone(),
        })
    }

    /// Returns the index of the agent.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the action space of the agent.
    pub fn act_space(&self) -> ActionSpace {
        self.actor.act_space()
    }

    /// Returns the number of updates.
    pub fn n_opts(&self) -> usize {
        self.n_opts
    }

    /// Returns the actor.
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Returns the critic.
    pub fn critic(&self) -> &Critic {
        &self.critic
    }

    fn obs_tensor(&self, obs: &[f32]) -> Result<Tensor> {
        let dim = self.obs_dims[self.index];
        if obs.len() != dim {
            return Err(MaddpgError::dim_mismatch(
                format!("observation of agent {}", self.index),
                dim,
                obs.len(),
            )
            .into());
        }
        Ok(Tensor::from_slice(obs, (1, dim), &self.device)?)
    }

    /// Deterministic action given the agent's own observation.
    pub fn act(&self, obs: &[f32]) -> Result<Vec<f32>> {
        let obs = self.obs_tensor(obs)?;
        Ok(self.actor.act(&obs)?.squeeze(0)?.to_vec1::<f32>()?)
    }

    /// Exploratory action given the agent's own observation.
    pub fn sample(&mut self, obs: &[f32]) -> Result<Vec<f32>> {
        let obs = self.obs_tensor(obs)?;
        let act = self
            .actor
            .explore(&obs, self.exploration_std, &mut self.rng)?;
        Ok(act.squeeze(0)?.to_vec1::<f32>()?)
    }

    /// Actions of the target actor on the next observations in the batch of this agent.
    pub fn target_act_batch(&self, batch: &AgentBatch) -> Result<Tensor> {
        let next_obs = Tensor::from_slice(
            &batch.next_obs,
            (batch.len(), batch.obs_dim),
            &self.device,
        )?;
        self.actor.act_tgt(&next_obs)
    }

    fn check_batch(&self, batch: &JointBatch, next_tgt_acts: &[Tensor]) -> Result<()> {
        let n_agents = self.obs_dims.len();
        let mut checks = vec![
            ("number of agents in batch".to_string(), n_agents, batch.n_agents()),
            ("number of target actions".to_string(), n_agents, next_tgt_acts.len()),
        ];
        for (j, b) in batch.agents.iter().enumerate().take(n_agents) {
            checks.push((format!("observation of agent {}", j), self.obs_dims[j], b.obs_dim));
            checks.push((format!("action of agent {}", j), self.act_dims[j], b.act_dim));
        }
        match checks.into_iter().find(|(_, e, a)| e != a) {
            Some((what, expected, actual)) => {
                Err(MaddpgError::dim_mismatch(what, expected, actual).into())
            }
            None => Ok(()),
        }
    }

    fn batch_tensors(&self, batch: &JointBatch) -> Result<(Vec<Tensor>, Vec<Tensor>, Vec<Tensor>)> {
        let b = batch.len();
        let mut obs = vec![];
        let mut act = vec![];
        let mut next_obs = vec![];
        for a in batch.agents.iter() {
            obs.push(Tensor::from_slice(&a.obs, (b, a.obs_dim), &self.device)?);
            act.push(Tensor::from_slice(&a.act, (b, a.act_dim), &self.device)?);
            next_obs.push(Tensor::from_slice(&a.next_obs, (b, a.obs_dim), &self.device)?);
        }
        Ok((obs, act, next_obs))
    }

    /// Updates the critic, the actor and their targets with a batch.
    ///
    /// `next_tgt_acts[j]` is the action of agent `j`'s target actor on its next
    /// observations in the batch. Returns [`MaddpgError::NumericInstability`] if
    /// a loss or a parameter is not finite; parameters may have been changed
    /// in that case.
    pub fn learn(&mut self, batch: &JointBatch, next_tgt_acts: &[Tensor]) -> Result<Record> {
        self.check_batch(batch, next_tgt_acts)?;
        let i = self.index;
        let b = batch.len();
        let (obs, act, next_obs) = self.batch_tensors(batch)?;
        let reward = Tensor::from_slice(&batch.agent(i).reward, (b,), &self.device)?;
        let is_terminated = {
            let d: Vec<f32> = batch.agent(i).is_terminated.iter().map(|&d| d as f32).collect();
            Tensor::from_vec(d, (b,), &self.device)?
        };

        // Inputs of the critic
        let (q_obs, q_act, q_next_obs, q_next_act) = match self.local_q_func {
            true => (
                obs[i].clone(),
                act[i].clone(),
                next_obs[i].clone(),
                next_tgt_acts[i].clone(),
            ),
            false => (
                Tensor::cat(&obs, 1)?,
                Tensor::cat(&act, 1)?,
                Tensor::cat(&next_obs, 1)?,
                Tensor::cat(next_tgt_acts, 1)?,
            ),
        };

        trace!("Agent {}: update critic", i);
        let tgt = {
            let q_next = self.critic.forward_tgt(&q_next_obs, &q_next_act)?;
            critic_target(&reward, &is_terminated, &q_next, self.gamma)?.detach()
        };
        let pred = self.critic.forward(&q_obs, &q_act)?;
        let loss_critic = mse(&pred, &tgt)?;
        let loss_critic_ = check_finite("loss_critic", &loss_critic)?;
        let q_mean = pred.mean_all()?.to_scalar::<f32>()?;
        let tgt_mean = tgt.mean_all()?.to_scalar::<f32>()?;
        let grad_norm_critic = self.critic.backward_step(&loss_critic, self.grad_norm_clip)?;

        trace!("Agent {}: update actor", i);
        let logits = self.actor.logits(&obs[i])?;
        let act_i = self.actor.sample_for_update(&logits, &mut self.rng)?;
        let q_act = match self.local_q_func {
            true => act_i,
            false => {
                let mut act = act;
                act[i] = act_i;
                Tensor::cat(&act, 1)?
            }
        };
        let qval = self.critic.forward(&q_obs, &q_act)?;
        let p_reg = logits.sqr()?.mean_all()?;
        let loss_actor = qval
            .mean_all()?
            .neg()?
            .add(&p_reg.affine(self.actor_reg, 0.)?)?;
        let loss_actor_ = check_finite("loss_actor", &loss_actor)?;
        let grad_norm_actor = self.actor.backward_step(&loss_actor, self.grad_norm_clip)?;

        trace!("Agent {}: soft update", i);
        self.critic.soft_update()?;
        self.actor.soft_update()?;
        self.critic.check_finite()?;
        self.actor.check_finite()?;
        self.n_opts += 1;

        let mut record = Record::from_slice(&[
            ("loss_critic", Scalar(loss_critic_)),
            ("loss_actor", Scalar(loss_actor_)),
            ("q_mean", Scalar(q_mean)),
            ("target_q_mean", Scalar(tgt_mean)),
        ]);
        if let Some(v) = grad_norm_critic {
            record.insert("grad_norm_critic", Scalar(v));
        }
        if let Some(v) = grad_norm_actor {
            record.insert("grad_norm_actor", Scalar(v));
        }

        Ok(record)
    }

    /// Saves the actor and the critic with their targets in the given directory.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        self.actor.save(dir)?;
        self.critic.save(dir)?;
        Ok(())
    }

    /// Loads the actor and the critic with their targets from the given directory.
    pub fn load(&mut self, dir: &Path) -> Result<()> {
        self.actor
            .load(dir)
            .with_context(|| format!("Failed to load actor of agent {}", self.index))?;
        self.critic
            .load(dir)
            .with_context(|| format!("Failed to load critic of agent {}", self.index))?;
        Ok(())
    }

    /// Returns the parameters of the actor, the target actor, the critic and
    /// the target critic, in this order, as a flat vector.
    pub fn export_params(&self) -> Result<Vec<f32>> {
        let mut params = export_params(self.actor.varmap())?;
        params.extend(export_params(self.actor.varmap_tgt())?);
        params.extend(export_params(self.critic.varmap())?);
        params.extend(export_params(self.critic.varmap_tgt())?);
        Ok(params)
    }

    /// Sets the parameters from a vector created by [`AgentTrainer::export_params`].
    pub fn import_params(&self, params: &[f32]) -> Result<()> {
        let varmaps = [
            self.actor.varmap(),
            self.actor.varmap_tgt(),
            self.critic.varmap(),
            self.critic.varmap_tgt(),
        ];
        let mut lens = vec![];
        for vm in varmaps.iter() {
            lens.push(n_params(vm)?);
        }
        let total: usize = lens.iter().sum();
        if total != params.len() {
            return Err(
                MaddpgError::dim_mismatch("number of parameters", total, params.len()).into(),
            );
        }

        let mut offset = 0;
        for (vm, n) in varmaps.iter().zip(lens.iter()) {
            import_params(vm, &params[offset..offset + n])?;
            offset += n;
        }
        Ok(())
    }
}
