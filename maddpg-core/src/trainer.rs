//! Train [`Agent`].
mod config;
mod sampler;
use crate::{
    error::is_insufficient_data,
    record::{AggregateRecorder, Record, RecordValue::Scalar},
    replay_buffer::Transition,
    Agent, Env, Evaluator, ExperienceBufferBase, ReplayBufferBase,
};
use anyhow::Result;
pub use config::TrainerConfig;
use log::{info, trace, warn};
pub use sampler::Sampler;
use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Manages training loop and related objects.
///
/// # Training loop
///
/// 0. Given an environment implementing [`Env`], an agent implementing [`Agent`],
///    a replay buffer, a recorder and an evaluator.
/// 1. Reset counters `env_steps = 0`, `opt_steps = 0`.
/// 2. Each agent samples its action from its own observation. The joint action is
///    applied to the environment and the transition is pushed to the replay buffer
///    by [`Sampler`]. Episodes are truncated at `max_episode_len` steps.
/// 3. `env_steps += 1`
/// 4. If `env_steps >= warmup_period` and `env_steps % opt_interval == 0`:
///     1. Do an optimization step of all agents with a batch sampled once from
///        the replay buffer. If the buffer does not hold enough transitions,
///        the agent returns [`MaddpgError::InsufficientData`] and the cycle is
///        skipped. Any other error aborts training.
///     2. `opt_steps += 1`
///     3. If `opt_steps % eval_interval == 0`, evaluate the agent. If the
///        evaluation result is the best, the parameters are saved in
///        `(model_dir)/best`.
///     4. If `opt_steps % save_interval == 0`, the parameters are saved in
///        `(model_dir)/(opt_steps)`.
///     5. If `opt_steps == max_opts`, finish training loop.
/// 5. If the number of finished episodes reaches `max_episodes`, finish training loop.
/// 6. Back to step 2.
///
/// # Interaction of objects
///
/// ```mermaid
/// graph LR
///     A[Agent]-->|JointAct|B[Env]
///     B -->|JointObs|A
///     B -->|Step|C[StepProcessor]
///     C -->|Transition|D[ReplayBuffer]
///     D -->|JointBatch|A
/// ```
///
/// [`MaddpgError::InsufficientData`]: crate::error::MaddpgError::InsufficientData
pub struct Trainer {
    /// Where to save the trained model.
    model_dir: Option<String>,

    /// The maximal number of optimization steps.
    max_opts: usize,

    /// The maximal number of episodes.
    max_episodes: usize,

    max_episode_len: usize,

    /// Interval of optimization in environment steps.
    opt_interval: usize,

    /// Warmup period, for filling replay buffer, in environment steps.
    warmup_period: usize,

    /// Interval of evaluation in optimization steps.
    eval_interval: usize,

    /// Interval of saving the model in optimization steps.
    save_interval: usize,

    save_rate: usize,

    /// Interval of flushing records in optimization steps.
    flush_records_interval: usize,

    /// Interval of recording computational cost in optimization steps.
    record_compute_cost_interval: usize,

    /// Interval of recording agent information in optimization steps.
    record_agent_info_interval: usize,

    /// Optimization steps for computing optimization steps per second.
    opt_steps_for_ops: usize,

    /// Timer for computing for optimization steps per second.
    timer_for_ops: Duration,
}

impl Trainer {
    /// Constructs a trainer.
    pub fn build(config: TrainerConfig) -> Self {
        Self {
            model_dir: config.model_dir,
            max_opts: config.max_opts,
            max_episodes: config.max_episodes,
            max_episode_len: config.max_episode_len,
            opt_interval: config.opt_interval.max(1),
            warmup_period: config.warmup_period,
            eval_interval: config.eval_interval,
            save_interval: config.save_interval,
            save_rate: config.save_rate,
            flush_records_interval: config.flush_record_interval.max(1),
            record_compute_cost_interval: config.record_compute_cost_interval.max(1),
            record_agent_info_interval: config.record_agent_info_interval.max(1),
            opt_steps_for_ops: 0,
            timer_for_ops: Duration::new(0, 0),
        }
    }

    fn save_model<R, A>(agent: &A, model_dir: PathBuf)
    where
        R: ReplayBufferBase,
        A: Agent<R>,
    {
        match agent.save_params(&model_dir) {
            Ok(()) => info!("Saved the model in {:?}.", &model_dir),
            Err(e) => warn!("Failed to save model in {:?}: {}", &model_dir, e),
        }
    }

    fn save_best_model<R, A>(agent: &A, model_dir: &str)
    where
        R: ReplayBufferBase,
        A: Agent<R>,
    {
        Self::save_model(agent, Path::new(model_dir).join("best"));
    }

    fn save_model_with_steps<R, A>(agent: &A, model_dir: &str, steps: usize)
    where
        R: ReplayBufferBase,
        A: Agent<R>,
    {
        Self::save_model(agent, Path::new(model_dir).join(steps.to_string()));
    }

    /// Returns optimization steps per second, then reset the internal counter.
    ///
    /// Returns 0 if no time has been measured.
    fn opt_steps_per_sec(&mut self) -> f32 {
        let secs = self.timer_for_ops.as_secs_f32();
        let osps = if secs > 0.0 {
            self.opt_steps_for_ops as f32 / secs
        } else {
            0.0
        };
        self.opt_steps_for_ops = 0;
        self.timer_for_ops = Duration::new(0, 0);
        osps
    }

    /// Performs a training step.
    ///
    /// First, it performes an environment step once and pushes a transition
    /// into the given buffer with [`Sampler`]. Then, if the number of environment steps
    /// reaches the optimization interval `opt_interval`, performes an optimization
    /// step.
    ///
    /// The second return value in the tuple is if an optimization step is done (`true`).
    pub fn train_step<E, A, R>(
        &mut self,
        agent: &mut A,
        buffer: &mut R,
        sampler: &mut Sampler<E>,
        env_steps: &mut usize,
        opt_steps: &mut usize,
    ) -> Result<(Record, bool)>
    where
        E: Env,
        A: Agent<R>,
        R: ExperienceBufferBase<Item = Transition> + ReplayBufferBase,
    {
        // Sample transition and push it into the replay buffer
        let mut record = sampler.sample_and_push(agent, buffer)?;
        *env_steps += 1;

        if *env_steps < self.warmup_period || *env_steps % self.opt_interval != 0 {
            return Ok((record, false));
        }

        let timer = SystemTime::now();
        match agent.opt_with_record(buffer) {
            Ok(record_agent) => {
                *opt_steps += 1;
                self.timer_for_ops += timer.elapsed()?;
                self.opt_steps_for_ops += 1;
                if *opt_steps % self.record_agent_info_interval == 0 {
                    record.merge_inplace(record_agent);
                }
                Ok((record, true))
            }
            Err(e) if is_insufficient_data(&e) => {
                trace!("Skipped optimization step: {}", e);
                Ok((record, false))
            }
            Err(e) => Err(e),
        }
    }

    /// Train the agent.
    ///
    /// `env` is used for collecting transitions, `buffer` is shared by all agents.
    pub fn train<E, A, R, D>(
        &mut self,
        env: E,
        agent: &mut A,
        buffer: &mut R,
        recorder: &mut dyn AggregateRecorder,
        evaluator: &mut D,
    ) -> Result<()>
    where
        E: Env,
        A: Agent<R>,
        R: ExperienceBufferBase<Item = Transition> + ReplayBufferBase,
        D: Evaluator<E>,
    {
        if self.max_opts == 0 && self.max_episodes == 0 {
            anyhow::bail!("Either max_opts or max_episodes must be positive");
        }

        let mut sampler = Sampler::new(env, self.max_episode_len, self.save_rate);
        let mut max_eval_reward = f32::MIN;
        let mut env_steps: usize = 0;
        let mut opt_steps: usize = 0;
        sampler.reset_fps_counter();
        agent.train();

        loop {
            let (mut record, is_opt) =
                self.train_step(agent, buffer, &mut sampler, &mut env_steps, &mut opt_steps)?;

            // Postprocessing after each optimization step
            if is_opt {
                // Add stats wrt computation cost
                if opt_steps % self.record_compute_cost_interval == 0 {
                    record.insert("fps", Scalar(sampler.fps()));
                    record.insert("opt_steps_per_sec", Scalar(self.opt_steps_per_sec()));
                }

                // Evaluation
                if self.eval_interval > 0 && opt_steps % self.eval_interval == 0 {
                    info!("Starts evaluation of the trained model");
                    agent.eval();
                    let record_eval = evaluator.evaluate(agent)?;
                    agent.train();
                    let eval_reward = record_eval.get_scalar("episode_return")?;
                    record.merge_inplace(record_eval.with_prefix("eval_"));

                    // Save the best model up to the current iteration
                    if eval_reward > max_eval_reward {
                        max_eval_reward = eval_reward;
                        if let Some(model_dir) = self.model_dir.as_ref() {
                            Self::save_best_model(agent, model_dir);
                        }
                    }
                }

                // Save the current model
                if self.save_interval > 0 && opt_steps % self.save_interval == 0 {
                    if let Some(model_dir) = self.model_dir.as_ref() {
                        Self::save_model_with_steps(agent, model_dir, opt_steps);
                    }
                }
            }

            let is_finished = (is_opt && opt_steps == self.max_opts)
                || (self.max_episodes > 0 && sampler.n_episodes() >= self.max_episodes);

            // Store record to the recorder
            if !record.is_empty() {
                recorder.store(record);
            }

            // Flush records
            if (is_opt && (opt_steps - 1) % self.flush_records_interval == 0) || is_finished {
                recorder.flush(opt_steps as _);
            }

            if is_finished {
                break;
            }
        }

        info!(
            "Finished training: {} environment steps, {} episodes, {} optimization steps",
            env_steps,
            sampler.n_episodes(),
            opt_steps
        );

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        dummy::{DummyAgent, DummyEnv, DummyEnvConfig},
        record::BufferedRecorder,
        replay_buffer::{ReplayBuffer, ReplayBufferConfig},
        DefaultEvaluator,
    };
    use tempdir::TempDir;

    fn agent_act_spaces() -> Vec<crate::ActionSpace> {
        vec![crate::ActionSpace::Discrete(3); 2]
    }

    fn setup(
        env_config: &DummyEnvConfig,
        min_buffer: usize,
    ) -> Result<(DummyEnv, DummyAgent, ReplayBuffer)> {
        let env = DummyEnv::build(env_config, 0)?;
        let agent = DummyAgent::new(env.act_spaces(), min_buffer);
        let act_dims = env.act_spaces().iter().map(|s| s.dim()).collect();
        let config = ReplayBufferConfig::default()
            .capacity(1000)
            .dims(env.obs_dims(), act_dims);
        let buffer = ReplayBuffer::build(&config)?;
        Ok((env, agent, buffer))
    }

    #[test]
    fn test_insufficient_data_skips_cycle() -> Result<()> {
        let env_config = DummyEnvConfig::default();
        let (env, mut agent, mut buffer) = setup(&env_config, 40)?;
        let mut evaluator = DefaultEvaluator::<DummyEnv>::new(&env_config, 0, 1, 25)?;
        let mut recorder = BufferedRecorder::new();
        let mut trainer = Trainer::build(TrainerConfig::default().max_opts(3).opt_interval(10));

        trainer.train(env, &mut agent, &mut buffer, &mut recorder, &mut evaluator)?;

        // Optimization is attempted at 10, 20, 30, ... and succeeds from 40
        assert_eq!(agent.n_opts_attempted(), 6);
        assert_eq!(agent.n_opts(), 3);
        assert_eq!(buffer.len(), 60);

        Ok(())
    }

    #[test]
    fn test_max_episodes_and_checkpoints() -> Result<()> {
        let env_config = DummyEnvConfig::default();
        let (env, mut agent, mut buffer) = setup(&env_config, 1)?;
        let mut evaluator = DefaultEvaluator::<DummyEnv>::new(&env_config, 0, 2, 25)?;
        let mut recorder = BufferedRecorder::new();
        let dir = TempDir::new("trainer")?;
        let model_dir = dir.path().to_string_lossy().to_string();
        let config = TrainerConfig::default()
            .max_episodes(4)
            .max_episode_len(10)
            .opt_interval(5)
            .eval_interval(2)
            .save_interval(4)
            .model_dir(model_dir);
        let mut trainer = Trainer::build(config);

        trainer.train(env, &mut agent, &mut buffer, &mut recorder, &mut evaluator)?;

        assert_eq!(buffer.len(), 40);
        assert_eq!(agent.n_opts(), 8);
        assert!(dir.path().join("best").join("dummy_agent.yaml").exists());
        assert!(dir.path().join("4").join("dummy_agent.yaml").exists());
        assert!(dir.path().join("8").join("dummy_agent.yaml").exists());
        assert!(recorder
            .iter()
            .any(|r| r.get_scalar("eval_episode_return").is_ok()));

        let mut agent_ = DummyAgent::new(agent_act_spaces(), 1);
        agent_.load_params(&dir.path().join("8"))?;
        assert_eq!(agent_.n_opts(), 8);

        Ok(())
    }

    #[test]
    fn test_other_errors_abort() -> Result<()> {
        let env_config = DummyEnvConfig::default();
        let (env, mut agent, mut buffer) = setup(&env_config, 1)?;
        agent.fail_at(2);
        let mut evaluator = DefaultEvaluator::<DummyEnv>::new(&env_config, 0, 1, 25)?;
        let mut recorder = BufferedRecorder::new();
        let mut trainer = Trainer::build(TrainerConfig::default().max_opts(10).opt_interval(1));

        let err = trainer
            .train(env, &mut agent, &mut buffer, &mut recorder, &mut evaluator)
            .unwrap_err();
        assert!(crate::error::is_numeric_instability(&err));
        assert_eq!(agent.n_opts(), 1);

        Ok(())
    }

    #[test]
    fn test_opt_steps_per_sec() {
        let mut trainer = Trainer::build(TrainerConfig::default());

        // Fast steps below the timer resolution
        trainer.opt_steps_for_ops = 3;
        assert_eq!(trainer.opt_steps_per_sec(), 0.0);

        trainer.opt_steps_for_ops = 5;
        trainer.timer_for_ops = Duration::from_micros(2500);
        assert!((trainer.opt_steps_per_sec() - 2000.0).abs() < 1e-2);
        assert_eq!(trainer.opt_steps_for_ops, 0);
        assert_eq!(trainer.timer_for_ops, Duration::new(0, 0));
    }
}
