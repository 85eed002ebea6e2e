mod spread;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::info;
use maddpg_candle_agent::maddpg::{Maddpg, MaddpgConfig};
use maddpg_core::{
    record::{LogRecorder, Recorder},
    replay_buffer::{ReplayBuffer, ReplayBufferConfig},
    Agent, Configurable, DefaultEvaluator, Env as _, Evaluator as _, ReplayBufferBase, Trainer,
    TrainerConfig,
};
use spread::{SimpleSpread, SimpleSpreadConfig};
use std::{fs, path::Path};

const OPT_INTERVAL: usize = 100;
const REPLAY_BUFFER_CAPACITY: usize = 1_000_000;

type Evaluator = DefaultEvaluator<SimpleSpread>;

/// Learning algorithm of a group of agents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PolicyKind {
    /// Centralized critic
    Maddpg,

    /// Critic on the agent's own observation and action
    Ddpg,
}

/// Train/eval MADDPG agents in the cooperative navigation environment
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Train agents, not evaluate
    #[arg(short, long, default_value_t = false)]
    train: bool,

    /// Evaluate agents, not train
    #[arg(short, long, default_value_t = false)]
    eval: bool,

    /// Number of agents
    #[arg(long, default_value_t = 3)]
    num_agents: usize,

    /// Use continuous actions
    #[arg(long, default_value_t = false)]
    continuous: bool,

    /// Maximum episode length
    #[arg(long, default_value_t = 25)]
    max_episode_len: usize,

    /// Number of training episodes
    #[arg(long, default_value_t = 60_000)]
    num_episodes: usize,

    /// Number of adversaries, the agents with the smallest indices
    #[arg(long, default_value_t = 0)]
    num_adversaries: usize,

    /// Policy of good agents
    #[arg(long, value_enum, default_value_t = PolicyKind::Maddpg)]
    good_policy: PolicyKind,

    /// Policy of adversaries
    #[arg(long, value_enum, default_value_t = PolicyKind::Maddpg)]
    adv_policy: PolicyKind,

    /// Learning rate of Adam
    #[arg(long, default_value_t = 1e-2)]
    lr: f64,

    /// Discount factor
    #[arg(long, default_value_t = 0.95)]
    gamma: f64,

    /// Batch size
    #[arg(long, default_value_t = 1024)]
    batch_size: usize,

    /// Updates start when the buffer holds this many batches
    #[arg(long, default_value_t = 25)]
    min_buffer_multiplier: usize,

    /// Number of units in the hidden layers
    #[arg(long, default_value_t = 64)]
    num_units: usize,

    /// Environment steps between updates
    #[arg(long, default_value_t = OPT_INTERVAL)]
    opt_interval: usize,

    /// Episodes between log outputs of mean episode reward
    #[arg(long, default_value_t = 100)]
    save_rate: usize,

    /// Optimization steps between evaluations
    #[arg(long, default_value_t = 100)]
    eval_interval: usize,

    /// Number of episodes in an evaluation
    #[arg(long, default_value_t = 10)]
    eval_episodes: usize,

    /// Directory of models and configurations
    #[arg(long, default_value = "./model/maddpg_spread")]
    model_dir: String,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn env_config(args: &Args) -> SimpleSpreadConfig {
    SimpleSpreadConfig::default()
        .n_agents(args.num_agents)
        .continuous(args.continuous)
}

fn local_q_func(args: &Args) -> Vec<bool> {
    (0..args.num_agents)
        .map(|i| match i < args.num_adversaries {
            true => args.adv_policy == PolicyKind::Ddpg,
            false => args.good_policy == PolicyKind::Ddpg,
        })
        .collect()
}

fn agent_config(args: &Args) -> Result<MaddpgConfig> {
    let env = SimpleSpread::build(&env_config(args), 0)?;
    Ok(MaddpgConfig::default()
        .agents(env.obs_dims(), env.act_spaces())
        .lr(args.lr)
        .gamma(args.gamma)
        .batch_size(args.batch_size)
        .min_buffer_multiplier(args.min_buffer_multiplier)
        .num_units(args.num_units)
        .local_q_func(local_q_func(args))
        .seed(args.seed))
}

fn trainer_config(args: &Args) -> TrainerConfig {
    TrainerConfig::default()
        .max_episodes(args.num_episodes)
        .max_episode_len(args.max_episode_len)
        .opt_interval(args.opt_interval)
        .save_rate(args.save_rate)
        .eval_interval(args.eval_interval)
        .save_interval(args.eval_interval * 10)
        .record_agent_info_interval(args.eval_interval)
        .record_compute_cost_interval(args.eval_interval)
        .flush_record_interval(args.eval_interval)
        .model_dir(args.model_dir.as_str())
}

fn train(args: &Args) -> Result<()> {
    let agent_config = agent_config(args)?;
    let trainer_config = trainer_config(args);
    let buffer_config = ReplayBufferConfig::default()
        .capacity(REPLAY_BUFFER_CAPACITY)
        .seed(args.seed)
        .dims(agent_config.obs_dims.clone(), agent_config.act_dims());

    fs::create_dir_all(&args.model_dir)?;
    let model_dir = Path::new(&args.model_dir);
    agent_config.save(model_dir.join("agent.yaml"))?;
    trainer_config.save(model_dir.join("trainer.yaml"))?;
    buffer_config.save(model_dir.join("replay_buffer.yaml"))?;

    info!(
        "Good policy: {:?}, adversary policy: {:?}",
        args.good_policy, args.adv_policy
    );
    let env_config = env_config(args);
    let env = SimpleSpread::build(&env_config, args.seed as i64)?;
    let mut agent = Maddpg::build(agent_config)?;
    let mut buffer = ReplayBuffer::build(&buffer_config)?;
    let mut recorder = LogRecorder::default();
    let mut evaluator = Evaluator::new(
        &env_config,
        args.seed as i64 + 1,
        args.eval_episodes,
        args.max_episode_len,
    )?;
    let mut trainer = Trainer::build(trainer_config);

    trainer.train(
        env,
        &mut agent,
        &mut buffer,
        &mut recorder,
        &mut evaluator,
    )?;
    info!("{} terminated flags", buffer.num_terminated_flags());
    info!("{} truncated flags", buffer.num_truncated_flags());
    info!("{} reward sum", buffer.sum_rewards());
    agent.save_params(&model_dir.join("final"))?;

    Ok(())
}

fn eval(args: &Args, load_dir: &Path) -> Result<()> {
    let model_dir = Path::new(&args.model_dir);
    let mut agent = {
        let mut agent = Maddpg::build(MaddpgConfig::load(model_dir.join("agent.yaml"))?)?;
        agent.load_params(load_dir)?;
        agent.eval();
        agent
    };

    let record = Evaluator::new(
        &env_config(args),
        args.seed as i64 + 1,
        args.eval_episodes,
        args.max_episode_len,
    )?
    .evaluate(&mut agent)?;
    LogRecorder::new("eval: ").write(record);

    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let load_dir = Path::new(&args.model_dir).join("final");

    if args.train {
        train(&args)?;
    } else if args.eval {
        eval(&args, &load_dir)?;
    } else {
        train(&args)?;
        eval(&args, &load_dir)?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    fn test_args(model_dir: &str, extra: &[&str]) -> Args {
        let mut argv = vec![
            "maddpg",
            "--num-episodes",
            "8",
            "--batch-size",
            "32",
            "--min-buffer-multiplier",
            "1",
            "--num-units",
            "16",
            "--opt-interval",
            "20",
            "--eval-interval",
            "2",
            "--eval-episodes",
            "1",
            "--save-rate",
            "4",
            "--model-dir",
            model_dir,
        ];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_local_q_func() {
        let args = test_args("", &["--num-adversaries", "1", "--adv-policy", "ddpg"]);
        assert_eq!(local_q_func(&args), vec![true, false, false]);

        let args = test_args("", &["--good-policy", "ddpg"]);
        assert_eq!(local_q_func(&args), vec![false, true, true]);
    }

    #[test]
    fn test_train_and_eval() -> Result<()> {
        let tmp_dir = TempDir::new("maddpg_spread")?;
        let model_dir = tmp_dir.path().to_str().unwrap();
        let args = test_args(model_dir, &[]);
        train(&args)?;

        // 8 episodes of 25 steps, an update every 20 steps
        assert!(tmp_dir.path().join("best").join("agent_0").exists());
        assert!(tmp_dir.path().join("final").join("agent_2").exists());
        assert_eq!(
            MaddpgConfig::load(tmp_dir.path().join("agent.yaml"))?,
            agent_config(&args)?
        );

        eval(&args, &tmp_dir.path().join("best"))?;

        Ok(())
    }

    #[test]
    fn test_train_continuous() -> Result<()> {
        let tmp_dir = TempDir::new("maddpg_spread_cont")?;
        let model_dir = tmp_dir.path().to_str().unwrap();
        let args = test_args(model_dir, &["--continuous", "--num-agents", "2"]);
        train(&args)?;
        eval(&args, &tmp_dir.path().join("final"))?;

        Ok(())
    }
}
