//! Experience sampling.
use crate::{
    record::{Record, RecordValue::Scalar},
    replay_buffer::{StepProcessor, Transition},
    Env, ExperienceBufferBase, JointObs, Policy,
};
use anyhow::Result;
use log::info;
use std::{collections::VecDeque, time::Instant};

/// Runs the environment with a policy and pushes transitions into a buffer.
///
/// The sampler resets the environment at the beginning of each episode and
/// truncates episodes longer than `max_episode_len`. It also keeps the rewards
/// of the last `save_rate` episodes, both summed over agents and per agent.
pub struct Sampler<E: Env> {
    env: E,

    /// Previous observation, `None` at the beginning of an episode.
    prev_obs: Option<JointObs>,

    step_processor: StepProcessor,
    max_episode_len: usize,
    episode_step: usize,
    episode_reward: f32,
    agent_rewards: Vec<f32>,

    /// Rewards of the last `save_rate` episodes.
    episode_rewards: VecDeque<f32>,

    /// Rewards of the last `save_rate` episodes, per agent.
    final_agent_rewards: Vec<VecDeque<f32>>,

    n_episodes: usize,
    save_rate: usize,
    env_steps: usize,
    env_steps_for_fps: usize,
    timer_for_fps: Instant,
}

impl<E: Env> Sampler<E> {
    /// Creates a new sampler.
    pub fn new(env: E, max_episode_len: usize, save_rate: usize) -> Self {
        let n_agents = env.n_agents();
        Self {
            env,
            prev_obs: None,
            step_processor: StepProcessor::new(),
            max_episode_len,
            episode_step: 0,
            episode_reward: 0.0,
            agent_rewards: vec![0.0; n_agents],
            episode_rewards: VecDeque::with_capacity(save_rate),
            final_agent_rewards: vec![VecDeque::with_capacity(save_rate); n_agents],
            n_episodes: 0,
            save_rate,
            env_steps: 0,
            env_steps_for_fps: 0,
            timer_for_fps: Instant::now(),
        }
    }

    /// Samples a joint action, applies it to the environment and pushes the
    /// resulting transition to the buffer.
    ///
    /// The returned record contains the information from the environment and,
    /// at the end of an episode, the episode reward.
    pub fn sample_and_push<P, R>(&mut self, policy: &mut P, buffer: &mut R) -> Result<Record>
    where
        P: Policy,
        R: ExperienceBufferBase<Item = Transition>,
    {
        // Reset the environment at the beginning of an episode
        let prev_obs = match self.prev_obs.take() {
            Some(obs) => obs,
            None => {
                let obs = self.env.reset()?;
                self.step_processor.reset(obs.clone());
                obs
            }
        };

        let act = policy.sample(&prev_obs)?;
        let (mut step, mut record) = self.env.step(&act)?;
        self.episode_step += 1;
        self.env_steps += 1;
        self.env_steps_for_fps += 1;
        if self.max_episode_len > 0 && self.episode_step >= self.max_episode_len {
            step.is_truncated = true;
        }

        self.episode_reward += step.reward.iter().sum::<f32>();
        for (acc, r) in self.agent_rewards.iter_mut().zip(step.reward.iter()) {
            *acc += r;
        }

        let is_done = step.is_done();
        if !is_done {
            self.prev_obs = Some(step.obs.clone());
        }

        let transition = self.step_processor.process(step)?;
        buffer.push(transition)?;

        if is_done {
            record.merge_inplace(self.finish_episode());
        }

        Ok(record)
    }

    fn finish_episode(&mut self) -> Record {
        let mut record = Record::from_scalar("episode_reward", self.episode_reward);
        let window = self.save_rate.max(1);
        push_bounded(&mut self.episode_rewards, self.episode_reward, window);
        for (rs, r) in self
            .final_agent_rewards
            .iter_mut()
            .zip(self.agent_rewards.iter())
        {
            push_bounded(rs, *r, window);
        }
        self.n_episodes += 1;

        let n = self.n_episodes;
        if self.save_rate > 0 && n % self.save_rate == 0 {
            let mean_reward = mean(&self.episode_rewards);
            info!(
                "steps: {}, episodes: {}, mean episode reward: {}",
                self.env_steps, n, mean_reward
            );
            record.insert("mean_episode_reward", Scalar(mean_reward));
            for (i, rs) in self.final_agent_rewards.iter().enumerate() {
                record.insert(format!("agent_{}_mean_episode_reward", i), Scalar(mean(rs)));
            }
        }

        self.episode_step = 0;
        self.episode_reward = 0.0;
        self.agent_rewards.iter_mut().for_each(|r| *r = 0.0);
        record
    }

    /// Returns the number of finished episodes.
    pub fn n_episodes(&self) -> usize {
        self.n_episodes
    }

    /// Returns the rewards of the last `save_rate` episodes, summed over agents.
    pub fn episode_rewards(&self) -> Vec<f32> {
        self.episode_rewards.iter().copied().collect()
    }

    /// Returns the rewards of the last `save_rate` episodes of the `i`-th agent.
    pub fn agent_episode_rewards(&self, i: usize) -> Vec<f32> {
        self.final_agent_rewards[i].iter().copied().collect()
    }

    /// Returns the number of environment steps.
    pub fn env_steps(&self) -> usize {
        self.env_steps
    }

    /// Returns environment steps per second since the last call, then resets the counter.
    pub fn fps(&mut self) -> f32 {
        let secs = self.timer_for_fps.elapsed().as_secs_f32();
        let fps = if secs > 0.0 {
            self.env_steps_for_fps as f32 / secs
        } else {
            0.0
        };
        self.reset_fps_counter();
        fps
    }

    /// Resets the counter for environment steps per second.
    pub fn reset_fps_counter(&mut self) {
        self.env_steps_for_fps = 0;
        self.timer_for_fps = Instant::now();
    }
}

fn push_bounded(xs: &mut VecDeque<f32>, x: f32, len: usize) {
    if xs.len() == len {
        xs.pop_front();
    }
    xs.push_back(x);
}

fn mean(xs: &VecDeque<f32>) -> f32 {
    xs.iter().sum::<f32>() / xs.len() as f32
}
