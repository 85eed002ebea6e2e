//! Utilities.
use anyhow::{anyhow, Context, Result};
use candle_core::{Tensor, Var};
use candle_nn::VarMap;
use itertools::Itertools;
use log::trace;
use maddpg_core::error::MaddpgError;
use rand::{rngs::StdRng, Rng};
use std::{collections::HashMap, sync::MutexGuard};

fn lock(varmap: &VarMap) -> Result<MutexGuard<'_, HashMap<String, Var>>> {
    varmap
        .data()
        .lock()
        .map_err(|_| anyhow!("Failed to lock VarMap"))
}

/// Apply soft update on variables.
///
/// Variables are identified by their names.
///
/// dest = tau * src + (1.0 - tau) * dest
pub fn track(dest: &VarMap, src: &VarMap, tau: f64) -> Result<()> {
    trace!("dest");
    let dest = lock(dest)?;
    trace!("src");
    let src = lock(src)?;

    for (k_dest, v_dest) in dest.iter() {
        let v_src = src
            .get(k_dest)
            .with_context(|| format!("Variable {} not found in the source", k_dest))?;
        let t_src = v_src.as_tensor().affine(tau, 0.)?;
        let t_dest = v_dest.as_tensor().affine(1.0 - tau, 0.)?;
        v_dest.set(&t_src.add(&t_dest)?)?;
    }

    Ok(())
}

/// Returns the parameters in a [`VarMap`] as a flat vector.
///
/// Variables are concatenated in the order of their names.
pub fn export_params(varmap: &VarMap) -> Result<Vec<f32>> {
    let data = lock(varmap)?;
    let mut params = vec![];
    for (_, var) in data.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        params.extend(var.as_tensor().flatten_all()?.to_vec1::<f32>()?);
    }
    Ok(params)
}

/// Returns the number of parameters in a [`VarMap`].
pub fn n_params(varmap: &VarMap) -> Result<usize> {
    Ok(lock(varmap)?.values().map(|v| v.elem_count()).sum())
}

/// Sets the parameters in a [`VarMap`] from a flat vector created by [`export_params`].
pub fn import_params(varmap: &VarMap, params: &[f32]) -> Result<()> {
    let n = n_params(varmap)?;
    if n != params.len() {
        return Err(MaddpgError::dim_mismatch("number of parameters", n, params.len()).into());
    }

    let data = lock(varmap)?;

    let mut offset = 0;
    for (_, var) in data.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        let n = var.elem_count();
        let t = Tensor::from_slice(&params[offset..offset + n], var.dims(), var.device())?;
        var.set(&t)?;
        offset += n;
    }

    Ok(())
}

/// Re-initializes the parameters of linear layers with a seeded random number generator.
///
/// Each element is drawn from `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`, where
/// `fan_in` is the input dimension of the weight matrix of the layer.
/// A bias `xxx.bias` takes the fan-in of `xxx.weight`.
pub fn reset_params(varmap: &VarMap, rng: &mut StdRng) -> Result<()> {
    let data = lock(varmap)?;
    for (name, var) in data.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        let fan_in = match name.strip_suffix(".bias") {
            Some(prefix) => data
                .get(&format!("{}.weight", prefix))
                .map(|w| w.dims()[w.dims().len() - 1])
                .unwrap_or(1),
            None => var.dims()[var.dims().len() - 1],
        };
        let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
        let values: Vec<f32> = (0..var.elem_count())
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        var.set(&Tensor::from_vec(values, var.dims(), var.device())?)?;
    }

    Ok(())
}

/// Returns the value of a scalar tensor, or [`MaddpgError::NumericInstability`]
/// if it is not finite.
pub fn check_finite(name: &str, t: &Tensor) -> Result<f32> {
    let v = t.to_scalar::<f32>()?;
    if !v.is_finite() {
        return Err(MaddpgError::NumericInstability(format!("{} = {}", name, v)).into());
    }
    Ok(v)
}

/// Returns [`MaddpgError::NumericInstability`] if any parameter in the [`VarMap`] is not finite.
pub fn check_params_finite(name: &str, varmap: &VarMap) -> Result<()> {
    let data = lock(varmap)?;
    for (k, v) in data.iter() {
        let xs = v.as_tensor().flatten_all()?.to_vec1::<f32>()?;
        if !xs.iter().all(|x| x.is_finite()) {
            return Err(
                MaddpgError::NumericInstability(format!("{}: parameter {}", name, k)).into(),
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::Init;
    use rand::SeedableRng;

    fn varmap_with(values: &[f32]) -> Result<VarMap> {
        let vm = VarMap::new();
        let init = Init::Randn {
            mean: 0.0,
            stdev: 1.0,
        };
        vm.get((values.len(),), "var1", init, DType::F32, &Device::Cpu)?;
        let t = Tensor::from_slice(values, (values.len(),), &Device::Cpu)?;
        lock(&vm)?.get("var1").unwrap().set(&t)?;
        Ok(vm)
    }

    #[test]
    fn test_track() -> Result<()> {
        let tau = 0.7;
        let vm_src = varmap_with(&[1.0, 2.0, 3.0])?;
        let vm_dest = varmap_with(&[4.0, 5.0, 6.0])?;

        track(&vm_dest, &vm_src, tau)?;

        let t = export_params(&vm_dest)?;
        let expected = [1.9f32, 2.9, 3.9];
        for (a, b) in t.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-5);
        }

        Ok(())
    }

    #[test]
    fn test_track_converges_without_overshoot() -> Result<()> {
        let vm_src = varmap_with(&[1.0, -2.0])?;
        let vm_dest = varmap_with(&[0.0, 0.0])?;

        let mut prev = export_params(&vm_dest)?;
        for _ in 0..200 {
            track(&vm_dest, &vm_src, 0.05)?;
            let cur = export_params(&vm_dest)?;
            assert!(cur[0] >= prev[0] && cur[0] <= 1.0);
            assert!(cur[1] <= prev[1] && cur[1] >= -2.0);
            prev = cur;
        }
        assert!((prev[0] - 1.0).abs() < 1e-3);
        assert!((prev[1] + 2.0).abs() < 1e-3);

        Ok(())
    }

    #[test]
    fn test_export_import_params() -> Result<()> {
        let vm = varmap_with(&[1.0, 2.0, 3.0])?;
        import_params(&vm, &[7.0, 8.0, 9.0])?;
        assert_eq!(export_params(&vm)?, vec![7.0, 8.0, 9.0]);

        let err = import_params(&vm, &[1.0]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<MaddpgError>(),
            Some(&MaddpgError::dim_mismatch("number of parameters", 3, 1))
        );

        Ok(())
    }

    #[test]
    fn test_reset_params_is_seeded() -> Result<()> {
        let vm1 = varmap_with(&[0.0; 4])?;
        let vm2 = varmap_with(&[1.0; 4])?;
        reset_params(&vm1, &mut StdRng::seed_from_u64(3))?;
        reset_params(&vm2, &mut StdRng::seed_from_u64(3))?;
        assert_eq!(export_params(&vm1)?, export_params(&vm2)?);

        Ok(())
    }

    #[test]
    fn test_check_finite() -> Result<()> {
        let t = Tensor::new(f32::NAN, &Device::Cpu)?;
        let err = check_finite("loss", &t).unwrap_err();
        assert!(maddpg_core::error::is_numeric_instability(&err));

        let t = Tensor::new(1.5f32, &Device::Cpu)?;
        assert_eq!(check_finite("loss", &t)?, 1.5);

        Ok(())
    }

    #[test]
    fn test_check_params_finite() -> Result<()> {
        // The sum of these values overflows f32
        let vm = varmap_with(&[3e38, 3e38, -1e38])?;
        check_params_finite("actor", &vm)?;

        let vm = varmap_with(&[0.5, f32::NAN, 1.0])?;
        let err = check_params_finite("actor", &vm).unwrap_err();
        assert_eq!(
            err.downcast_ref::<MaddpgError>(),
            Some(&MaddpgError::NumericInstability("actor: parameter var1".into()))
        );

        let vm = varmap_with(&[f32::INFINITY])?;
        assert!(check_params_finite("critic", &vm).is_err());

        Ok(())
    }
}
