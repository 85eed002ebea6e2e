//! Actor of an agent.
use crate::{
    mlp::{Mlp, MlpConfig},
    model::SubModel1,
    opt::{Optimizer, OptimizerConfig},
    util::{check_params_finite, reset_params, track},
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{ops::softmax, VarBuilder, VarMap};
use log::info;
use maddpg_core::ActionSpace;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Gumbel, Normal};
use std::path::Path;

/// Draws `softmax(logits + g)` with standard Gumbel noise `g`.
///
/// The result is differentiable with respect to `logits`.
pub(super) fn gumbel_softmax(logits: &Tensor, rng: &mut StdRng) -> Result<Tensor> {
    let gumbel = Gumbel::new(0f32, 1f32)?;
    let noise: Vec<f32> = gumbel.sample_iter(&mut *rng).take(logits.elem_count()).collect();
    let noise = Tensor::from_vec(noise, logits.dims(), logits.device())?;
    Ok(softmax(&logits.add(&noise)?, D::Minus1)?)
}

/// Draws `n` samples from `N(0, std^2)`.
pub(super) fn gaussian_noise(n: usize, std: f64, rng: &mut StdRng) -> Result<Vec<f32>> {
    let normal = Normal::new(0.0, std)?;
    Ok(normal.sample_iter(&mut *rng).take(n).map(|x: f64| x as f32).collect())
}

/// Actor of an agent, mapping its own observation to its action.
///
/// The actor has a target copy, which is identical to the live network at
/// construction and changes only through [`Actor::soft_update`].
pub struct Actor {
    device: Device,
    act_space: ActionSpace,
    tau: f64,
    varmap: VarMap,
    varmap_tgt: VarMap,
    policy: Mlp,
    policy_tgt: Mlp,
    opt: Optimizer,
}

impl Actor {
    /// Constructs [`Actor`].
    ///
    /// Parameters are initialized with `rng`.
    pub fn build(
        obs_dim: usize,
        act_space: ActionSpace,
        num_units: usize,
        opt_config: &OptimizerConfig,
        tau: f64,
        device: &Device,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let config = MlpConfig::new(obs_dim, vec![num_units; 2], act_space.dim(), false);
        let (varmap, policy) = Self::build_policy(&config, device)?;
        let (varmap_tgt, policy_tgt) = Self::build_policy(&config, device)?;
        reset_params(&varmap, rng)?;
        track(&varmap_tgt, &varmap, 1.0)?;
        let opt = opt_config.build(varmap.all_vars())?;

        Ok(Self {
            device: device.clone(),
            act_space,
            tau,
            varmap,
            varmap_tgt,
            policy,
            policy_tgt,
            opt,
        })
    }

    fn build_policy(config: &MlpConfig, device: &Device) -> Result<(VarMap, Mlp)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device).pp("actor");
        let policy = <Mlp as SubModel1>::build(vb, config.clone())?;
        Ok((varmap, policy))
    }

    /// Returns the action space.
    pub fn act_space(&self) -> ActionSpace {
        self.act_space
    }

    /// Returns the raw outputs of the live network, shape `(batch_size, act_dim)`.
    pub fn logits(&self, obs: &Tensor) -> Result<Tensor> {
        self.policy.forward(obs)
    }

    /// Maps raw outputs to deterministic actions: softmax for discrete, tanh for continuous.
    pub fn action(&self, logits: &Tensor) -> Result<Tensor> {
        match self.act_space {
            ActionSpace::Discrete(_) => Ok(softmax(logits, D::Minus1)?),
            ActionSpace::Continuous(_) => Ok(logits.tanh()?),
        }
    }

    /// Deterministic actions of the live network.
    pub fn act(&self, obs: &Tensor) -> Result<Tensor> {
        self.action(&self.logits(obs)?)
    }

    /// Deterministic actions of the target network.
    pub fn act_tgt(&self, obs: &Tensor) -> Result<Tensor> {
        self.action(&self.policy_tgt.forward(obs)?)
    }

    /// Differentiable sample used in the policy update.
    ///
    /// Discrete actions are Gumbel-softmax samples; continuous actions are deterministic.
    pub fn sample_for_update(&self, logits: &Tensor, rng: &mut StdRng) -> Result<Tensor> {
        match self.act_space {
            ActionSpace::Discrete(_) => gumbel_softmax(logits, rng),
            ActionSpace::Continuous(_) => Ok(logits.tanh()?),
        }
    }

    /// Exploratory actions of the live network.
    ///
    /// Continuous actions get Gaussian noise of standard deviation `std`, then
    /// are clamped to `[-1, 1]`.
    pub fn explore(&self, obs: &Tensor, std: f64, rng: &mut StdRng) -> Result<Tensor> {
        let logits = self.logits(obs)?;
        match self.act_space {
            ActionSpace::Discrete(_) => gumbel_softmax(&logits, rng),
            ActionSpace::Continuous(_) => {
                let noise = gaussian_noise(logits.elem_count(), std, rng)?;
                let noise = Tensor::from_vec(noise, logits.dims(), &self.device)?;
                Ok(logits.tanh()?.add(&noise)?.clamp(-1f32, 1f32)?)
            }
        }
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
        check_params_finite("actor", &self.varmap)?;
        check_params_finite("actor_tgt", &self.varmap_tgt)
    }

    /// Returns the variables of the live network.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Returns the variables of the target network.
    pub fn varmap_tgt(&self) -> &VarMap {
        &self.varmap_tgt
    }

    /// Saves the live and target networks in `actor.safetensors` and
    /// `actor_tgt.safetensors` in the given directory.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let path = dir.as_ref().join("actor.safetensors");
        self.varmap.save(&path)?;
        let path_tgt = dir.as_ref().join("actor_tgt.safetensors");
        self.varmap_tgt.save(&path_tgt)?;
        info!("Save actor to {:?}", dir.as_ref());
        Ok(())
    }

    /// Loads the live and target networks from the given directory.
    pub fn load(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        self.varmap.load(dir.as_ref().join("actor.safetensors"))?;
        self.varmap_tgt
            .load(dir.as_ref().join("actor_tgt.safetensors"))?;
        info!("Load actor from {:?}", dir.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::export_params;
    use rand::SeedableRng;

    #[test]
    fn test_gumbel_softmax_is_distribution() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(0);
        let logits = Tensor::from_slice(&[0.5f32, -1.0, 2.0, 0.0, 0.0, 0.0], (2, 3), &Device::Cpu)?;
        let p = gumbel_softmax(&logits, &mut rng)?.to_vec2::<f32>()?;
        for row in p.iter() {
            assert!(row.iter().all(|&x| (0.0..=1.0).contains(&x)));
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }

        Ok(())
    }

    #[test]
    fn test_gaussian_noise() -> Result<()> {
        let noise1 = gaussian_noise(10_000, 0.5, &mut StdRng::seed_from_u64(3))?;
        let noise2 = gaussian_noise(10_000, 0.5, &mut StdRng::seed_from_u64(3))?;
        assert_eq!(noise1, noise2);

        let n = noise1.len() as f32;
        let mean = noise1.iter().sum::<f32>() / n;
        let var = noise1.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
        assert!(mean.abs() < 0.05);
        assert!((var.sqrt() - 0.5).abs() < 0.05);

        assert!(gaussian_noise(1, -1.0, &mut StdRng::seed_from_u64(3)).is_err());

        Ok(())
    }

    #[test]
    fn test_target_is_copied_at_construction() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(0);
        let opt = OptimizerConfig::default();
        let act_space = ActionSpace::Discrete(5);
        let actor = Actor::build(4, act_space, 16, &opt, 0.01, &Device::Cpu, &mut rng)?;
        assert_eq!(export_params(actor.varmap())?, export_params(actor.varmap_tgt())?);

        Ok(())
    }

    #[test]
    fn test_continuous_exploration_in_range() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(0);
        let opt = OptimizerConfig::default();
        let act_space = ActionSpace::Continuous(2);
        let actor = Actor::build(3, act_space, 16, &opt, 0.01, &Device::Cpu, &mut rng)?;
        let obs = Tensor::from_slice(&[10f32; 30], (10, 3), &Device::Cpu)?;
        let a = actor.explore(&obs, 5.0, &mut rng)?.to_vec2::<f32>()?;
        assert!(a.iter().flatten().all(|&x| (-1.0..=1.0).contains(&x)));

        Ok(())
    }
}
