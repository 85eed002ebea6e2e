//! Default implementation of the [`Evaluator`] trait.
use super::Evaluator;
use crate::{
    record::{Record, RecordValue::Scalar},
    Env, Policy,
};
use anyhow::Result;

/// Runs a fixed number of episodes and returns the average returns.
///
/// The record has `"episode_return"`, the return summed over agents, and
/// `"agent_{i}_return"` for each agent, both averaged over episodes.
pub struct DefaultEvaluator<E: Env> {
    /// The number of episodes to run during evaluation.
    n_episodes: usize,

    /// Episodes are cut at this length.
    max_episode_len: usize,

    env: E,
}

impl<E: Env> Evaluator<E> for DefaultEvaluator<E> {
    fn evaluate<P: Policy>(&mut self, policy: &mut P) -> Result<Record> {
        let n_agents = self.env.n_agents();
        let mut r_agents = vec![0f32; n_agents];

        for ix in 0..self.n_episodes {
            let mut prev_obs = self.env.reset_with_index(ix)?;
            let mut t = 0;

            loop {
                let act = policy.sample(&prev_obs)?;
                let (step, _) = self.env.step(&act)?;
                for (acc, r) in r_agents.iter_mut().zip(step.reward.iter()) {
                    *acc += r;
                }
                t += 1;
                if step.is_done() || (self.max_episode_len > 0 && t >= self.max_episode_len) {
                    break;
                }
                prev_obs = step.obs;
            }
        }

        let n = self.n_episodes.max(1) as f32;
        let mut record = Record::from_scalar("episode_return", r_agents.iter().sum::<f32>() / n);
        for (i, r) in r_agents.iter().enumerate() {
            record.insert(format!("agent_{}_return", i), Scalar(r / n));
        }

        Ok(record)
    }
}

impl<E: Env> DefaultEvaluator<E> {
    /// Constructs a new [`DefaultEvaluator`].
    ///
    /// * `config` - Configuration for the environment
    /// * `seed` - Random seed for environment initialization
    /// * `n_episodes` - Number of episodes to run during evaluation
    /// * `max_episode_len` - Maximum length of an episode, `0` for no limit
    pub fn new(
        config: &E::Config,
        seed: i64,
        n_episodes: usize,
        max_episode_len: usize,
    ) -> Result<Self> {
        Ok(Self {
            n_episodes,
            max_episode_len,
            env: E::build(config, seed)?,
        })
    }
}
