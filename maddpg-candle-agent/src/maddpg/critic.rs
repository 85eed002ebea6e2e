//! Critic of an agent.
use crate::{
    mlp::{Mlp, MlpConfig},
    model::SubModel2,
    opt::{Optimizer, OptimizerConfig},
    util::{check_params_finite, reset_params, track},
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{VarBuilder, VarMap};
use log::info;
use rand::rngs::StdRng;
use std::path::Path;

/// Action-value function with a target copy.
///
/// A centralized critic takes the concatenated observations and actions of all
/// agents. A local critic takes those of its own agent only.
pub struct Critic {
    tau: f64,
    varmap: VarMap,
    varmap_tgt: VarMap,
    q: Mlp,
    q_tgt: Mlp,
    opt: Optimizer,
}

impl Critic {
    /// Constructs [`Critic`] taking observations of dimension `obs_dim` and
    /// actions of dimension `act_dim`.
    ///
    /// Parameters are initialized with `rng`.
    pub fn build(
        obs_dim: usize,
        act_dim: usize,
        num_units: usize,
        opt_config: &OptimizerConfig,
        tau: f64,
        device: &Device,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let config = MlpConfig::new(obs_dim + act_dim, vec![num_units; 2], 1, false);
        let (varmap, q) = Self::build_q(&config, device)?;
        let (varmap_tgt, q_tgt) = Self::build_q(&config, device)?;
        reset_params(&varmap, rng)?;

        // Copy parameters
        track(&varmap_tgt, &varmap, 1.0)?;
        let opt = opt_config.build(varmap.all_vars())?;

        Ok(Self {
            tau,
            varmap,
            varmap_tgt,
            q,
            q_tgt,
            opt,
        })
    }

    fn build_q(config: &MlpConfig, device: &Device) -> Result<(VarMap, Mlp)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device).pp("critic");
        let q = <Mlp as SubModel2>::build(vb, config.clone())?;
        Ok((varmap, q))
    }

    /// Returns action values of shape `(batch_size,)`.
    pub fn forward(&self, obs: &Tensor, act: &Tensor) -> Result<Tensor> {
        Ok(self.q.forward(obs, act)?.squeeze(D::Minus1)?)
    }

    /// Returns action values of the target network, shape `(batch_size,)`.
    pub fn forward_tgt(&self, obs: &Tensor, act: &Tensor) -> Result<Tensor> {
        Ok(self.q_tgt.forward(obs, act)?.squeeze(D::Minus1)?)
    }

    /// Applies a backward step pass. Returns the gradient norm if clipped.
    pub fn backward_step(
        &mut self,
        loss: &Tensor,
        grad_norm_clip: Option<f64>,
    ) -> Result<Option<f32>> {
        match grad_norm_clip {
            Some(max_norm) => Ok(Some(self.opt.backward_step_clipped(loss, max_norm)?)),
            None => {
                self.opt.backward_step(loss)?;
                Ok(None)
            }
        }
    }

    /// Moves the target network towards the live network.
    pub fn soft_update(&self) -> Result<()> {
        track(&self.varmap_tgt, &self.varmap, self.tau)
    }

    /// Returns [`MaddpgError::NumericInstability`] if any parameter is not finite.
    ///
    /// [`MaddpgError::NumericInstability`]: maddpg_core::error::MaddpgError::NumericInstability
    pub fn check_finite(&self) -> Result<()> {
        check_params_finite("critic", &self.varmap)?;
        check_params_finite("critic_tgt", &self.varmap_tgt)
    }

    /// Returns the variables of the live network.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Returns the variables of the target network.
    pub fn varmap_tgt(&self) -> &VarMap {
        &self.varmap_tgt
    }

    /// Saves the live and target networks in `critic.safetensors` and
    /// `critic_tgt.safetensors` in the given directory.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        self.varmap.save(dir.as_ref().join("critic.safetensors"))?;
        self.varmap_tgt
            .save(dir.as_ref().join("critic_tgt.safetensors"))?;
        info!("Save critic to {:?}", dir.as_ref());
        Ok(())
    }

    /// Loads the live and target networks from the given directory.
    pub fn load(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        self.varmap.load(dir.as_ref().join("critic.safetensors"))?;
        self.varmap_tgt
            .load(dir.as_ref().join("critic_tgt.safetensors"))?;
        info!("Load critic from {:?}", dir.as_ref());
        Ok(())
    }
}
