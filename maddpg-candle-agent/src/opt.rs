//! Optimizers.
use anyhow::Result;
use candle_core::{backprop::GradStore, Tensor, Var};
use candle_nn::{AdamW, Optimizer as _, ParamsAdamW};
use candle_optimisers::adam::{Adam, ParamsAdam};
use serde::{Deserialize, Serialize};

/// Configuration of optimizer for training neural networks in an RL agent.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum OptimizerConfig {
    /// AdamW optimizer.
    AdamW {
        /// Learning rate.
        lr: f64,
        /// Coefficient for the running average of the gradient.
        #[serde(default = "default_beta1")]
        beta1: f64,
        /// Coefficient for the running average of the squared gradient.
        #[serde(default = "default_beta2")]
        beta2: f64,
        /// Term added to the denominator for numerical stability.
        #[serde(default = "default_eps")]
        eps: f64,
        /// Weight decay.
        #[serde(default = "default_weight_decay")]
        weight_decay: f64,
    },

    /// Adam optimizer.
    Adam {
        /// Learning rate.
        lr: f64,
    },
}

fn default_beta1() -> f64 {
    ParamsAdamW::default().beta1
}

fn default_beta2() -> f64 {
    ParamsAdamW::default().beta2
}

fn default_eps() -> f64 {
    ParamsAdamW::default().eps
}

fn default_weight_decay() -> f64 {
    ParamsAdamW::default().weight_decay
}

impl OptimizerConfig {
    /// Constructs an optimizer of the given variables.
    pub fn build(&self, vars: Vec<Var>) -> Result<Optimizer> {
        match &self {
            OptimizerConfig::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => {
                let params = ParamsAdamW {
                    lr: *lr,
                    beta1: *beta1,
                    beta2: *beta2,
                    eps: *eps,
                    weight_decay: *weight_decay,
                };
                let opt = AdamW::new(vars.clone(), params)?;
                Ok(Optimizer::AdamW(opt, vars))
            }
            OptimizerConfig::Adam { lr } => {
                let params = ParamsAdam {
                    lr: *lr,
                    ..ParamsAdam::default()
                };
                let opt = Adam::new(vars.clone(), params)?;
                Ok(Optimizer::Adam(opt, vars))
            }
        }
    }

    /// Override learning rate.
    pub fn learning_rate(self, lr: f64) -> Self {
        match self {
            Self::AdamW {
                lr: _,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => Self::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            },
            Self::Adam { lr: _ } => Self::Adam { lr },
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam { lr: 1e-2 }
    }
}

/// Optimizers.
///
/// This is a thin wrapper of optimizers in candle, keeping the optimized
/// variables for gradient clipping.
pub enum Optimizer {
    /// AdamW optimizer.
    AdamW(AdamW, Vec<Var>),

    /// Adam optimizer.
    Adam(Adam, Vec<Var>),
}

impl Optimizer {
    fn vars(&self) -> &[Var] {
        match self {
            Self::AdamW(_, vars) => vars,
            Self::Adam(_, vars) => vars,
        }
    }

    /// Applies a backward step pass.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        match self {
            Self::AdamW(opt, _) => Ok(opt.backward_step(loss)?),
            Self::Adam(opt, _) => Ok(opt.backward_step(loss)?),
        }
    }

    /// Applies a backward step pass after clipping the global norm of the
    /// gradients to `max_norm`.
    ///
    /// Returns the global norm of the gradients before clipping.
    pub fn backward_step_clipped(&mut self, loss: &Tensor, max_norm: f64) -> Result<f32> {
        let mut grads = loss.backward()?;
        let norm = clip_grad_norm(&mut grads, self.vars(), max_norm)?;
        self.step(&grads)?;
        Ok(norm)
    }

    /// Updates the variables with the given gradients.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Self::AdamW(opt, _) => Ok(opt.step(grads)?),
            Self::Adam(opt, _) => Ok(opt.step(grads)?),
        }
    }
}

/// Rescales the gradients of `vars` so that their global L2 norm is at most `max_norm`.
///
/// Returns the global norm before rescaling.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f32> {
    let mut sum_sq = 0f32;
    for var in vars.iter() {
        if let Some(g) = grads.get(var.as_tensor()) {
            sum_sq += g.sqr()?.sum_all()?.to_scalar::<f32>()?;
        }
    }
    let norm = sum_sq.sqrt();

    if norm.is_finite() && norm as f64 > max_norm {
        let scale = max_norm / (norm as f64 + 1e-6);
        for var in vars.iter() {
            if let Some(g) = grads.get(var.as_tensor()) {
                let g = g.affine(scale, 0.)?;
                grads.insert(var.as_tensor(), g);
            }
        }
    }

    Ok(norm)
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_clip_grad_norm() -> Result<()> {
        let var = Var::zeros((2,), DType::F32, &Device::Cpu)?;
        let target = Tensor::from_slice(&[3f32, 4.0], (2,), &Device::Cpu)?;

        // loss = sum((x - target)^2) / 2, gradient = x - target = [-3, -4]
        let loss = var.as_tensor().sub(&target)?.sqr()?.sum_all()?.affine(0.5, 0.)?;
        let mut grads = loss.backward()?;
        let norm = clip_grad_norm(&mut grads, &[var.clone()], 1.0)?;
        assert!((norm - 5.0).abs() < 1e-5);

        let g = grads
            .get(var.as_tensor())
            .unwrap()
            .to_vec1::<f32>()?;
        assert!((g[0] + 0.6).abs() < 1e-4);
        assert!((g[1] + 0.8).abs() < 1e-4);

        Ok(())
    }

    #[test]
    fn test_backward_step_clipped() -> Result<()> {
        let var = Var::zeros((2,), DType::F32, &Device::Cpu)?;
        let target = Tensor::from_slice(&[3f32, 4.0], (2,), &Device::Cpu)?;
        let mut opt = OptimizerConfig::Adam { lr: 0.1 }.build(vec![var.clone()])?;

        let loss = var.as_tensor().sub(&target)?.sqr()?.sum_all()?;
        let norm = opt.backward_step_clipped(&loss, 0.5)?;
        assert!(norm > 0.5);

        // Adam moves every element towards the target
        let x = var.as_tensor().to_vec1::<f32>()?;
        assert!(x[0] > 0.0 && x[1] > 0.0);

        Ok(())
    }
}
