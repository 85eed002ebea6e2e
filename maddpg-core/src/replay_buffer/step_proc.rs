//! Conversion of [`Step`] into [`Transition`].
use super::Transition;
use crate::{JointObs, Step};
use anyhow::{Context, Result};

/// Keeps the previous joint observation and produces transitions
/// `(o_t, a_t, r_t, o_t+1)` from [`Step`] objects.
#[derive(Default)]
pub struct StepProcessor {
    prev_obs: Option<JointObs>,
}

impl StepProcessor {
    /// Builds a step processor.
    pub fn new() -> Self {
        Self { prev_obs: None }
    }

    /// Resets the processor with the initial observation of an episode.
    pub fn reset(&mut self, init_obs: JointObs) {
        self.prev_obs = Some(init_obs);
    }

    /// Processes a [`Step`] object.
    pub fn process(&mut self, step: Step) -> Result<Transition> {
        let obs = self
            .prev_obs
            .replace(step.obs.clone())
            .context("StepProcessor::process() was called before reset()")?;

        Ok(Transition {
            obs,
            act: step.act,
            reward: step.reward,
            next_obs: step.obs,
            is_terminated: step.is_terminated,
            is_truncated: step.is_truncated,
        })
    }
}
