use anyhow::Result;
use maddpg_candle_agent::{
    maddpg::{Maddpg, MaddpgConfig},
    util::export_params,
};
use maddpg_core::{
    dummy::{DummyEnv, DummyEnvConfig},
    error::{is_insufficient_data, is_numeric_instability, MaddpgError},
    replay_buffer::{ReplayBuffer, ReplayBufferConfig, Transition},
    ActionSpace, Agent, Configurable, Env, ExperienceBufferBase, Policy, ReplayBufferBase, Sampler,
};
use tempdir::TempDir;

const N_AGENTS: usize = 3;
const OBS_DIM: usize = 4;
const N_ACTIONS: usize = 5;
const TAU: f64 = 0.01;

fn env_config() -> DummyEnvConfig {
    DummyEnvConfig::default()
        .n_agents(N_AGENTS)
        .obs_dim(OBS_DIM)
        .act_space(ActionSpace::Discrete(N_ACTIONS))
        .episode_len(10)
}

fn agent_config(seed: u64) -> MaddpgConfig {
    MaddpgConfig::default()
        .agents(
            vec![OBS_DIM; N_AGENTS],
            vec![ActionSpace::Discrete(N_ACTIONS); N_AGENTS],
        )
        .num_units(32)
        .batch_size(32)
        .min_buffer_multiplier(1)
        .tau(TAU)
        .seed(seed)
}

fn build_buffer() -> Result<ReplayBuffer> {
    let config = ReplayBufferConfig::default()
        .capacity(100)
        .seed(1)
        .dims(vec![OBS_DIM; N_AGENTS], vec![N_ACTIONS; N_AGENTS]);
    ReplayBuffer::build(&config)
}

/// Runs `n` environment steps with the agent in training mode.
fn fill_buffer(agent: &mut Maddpg, buffer: &mut ReplayBuffer, n: usize) -> Result<()> {
    let env = DummyEnv::build(&env_config(), 0)?;
    let mut sampler = Sampler::new(env, 25, 100);
    agent.train();
    for _ in 0..n {
        sampler.sample_and_push(agent, buffer)?;
    }
    Ok(())
}

struct Snapshot {
    actor: Vec<Vec<f32>>,
    actor_tgt: Vec<Vec<f32>>,
    critic: Vec<Vec<f32>>,
    critic_tgt: Vec<Vec<f32>>,
}

fn snapshot(agent: &Maddpg) -> Result<Snapshot> {
    let mut s = Snapshot {
        actor: vec![],
        actor_tgt: vec![],
        critic: vec![],
        critic_tgt: vec![],
    };
    for i in 0..agent.n_agents() {
        let t = agent.trainer(i);
        s.actor.push(export_params(t.actor().varmap())?);
        s.actor_tgt.push(export_params(t.actor().varmap_tgt())?);
        s.critic.push(export_params(t.critic().varmap())?);
        s.critic_tgt.push(export_params(t.critic().varmap_tgt())?);
    }
    Ok(s)
}

/// Checks `tgt_new = tau * live_new + (1 - tau) * tgt_old` without overshoot.
fn assert_soft_update(tgt_old: &[f32], tgt_new: &[f32], live_new: &[f32]) {
    for ((t0, t1), l) in tgt_old.iter().zip(tgt_new.iter()).zip(live_new.iter()) {
        let gap = (l - t0).abs();
        assert!((t1 - t0).abs() <= TAU as f32 * gap + 1e-6);
        assert!((t1 - l).abs() <= gap + 1e-6);
    }
}

#[test]
fn test_end_to_end_learn() -> Result<()> {
    let mut agent = Maddpg::build(agent_config(42))?;
    let mut buffer = build_buffer()?;

    // One step short of the batch size
    fill_buffer(&mut agent, &mut buffer, 31)?;
    let err = agent.opt_with_record(&mut buffer).unwrap_err();
    assert!(is_insufficient_data(&err));

    let mut agent = Maddpg::build(agent_config(42))?;
    let mut buffer = build_buffer()?;
    fill_buffer(&mut agent, &mut buffer, 32)?;
    assert_eq!(buffer.len(), 32);

    let before = snapshot(&agent)?;
    let record = agent.opt_with_record(&mut buffer)?;
    let after = snapshot(&agent)?;

    for i in 0..N_AGENTS {
        assert!(record
            .get_scalar(&format!("agent_{}_loss_critic", i))?
            .is_finite());
        assert_ne!(before.critic[i], after.critic[i]);
        assert_ne!(before.actor[i], after.actor[i]);
        assert_soft_update(&before.critic_tgt[i], &after.critic_tgt[i], &after.critic[i]);
        assert_soft_update(&before.actor_tgt[i], &after.actor_tgt[i], &after.actor[i]);
    }

    Ok(())
}

#[test]
fn test_actions_are_decentralized() -> Result<()> {
    let agent = Maddpg::build(agent_config(42))?;
    let obs1 = vec![vec![0.1; OBS_DIM], vec![0.2; OBS_DIM], vec![0.3; OBS_DIM]];
    let obs2 = vec![vec![0.1; OBS_DIM], vec![-5.0; OBS_DIM], vec![9.0; OBS_DIM]];

    let a1 = agent.act(&obs1)?;
    let a2 = agent.act(&obs2)?;
    assert_eq!(a1[0], a2[0]);
    assert_eq!(a1.len(), N_AGENTS);
    assert!(a1.iter().all(|a| a.len() == N_ACTIONS));

    Ok(())
}

#[test]
fn test_determinism() -> Result<()> {
    let transitions = {
        let mut agent = Maddpg::build(agent_config(0))?;
        let mut buffer = build_buffer()?;
        fill_buffer(&mut agent, &mut buffer, 40)?;
        buffer.whole_batch()
    };
    let to_buffer = || -> Result<ReplayBuffer> {
        let mut buffer = build_buffer()?;
        for k in 0..transitions.len() {
            buffer.push(Transition {
                obs: transitions
                    .agents
                    .iter()
                    .map(|b| b.obs_row(k).to_vec())
                    .collect(),
                act: transitions
                    .agents
                    .iter()
                    .map(|b| b.act_row(k).to_vec())
                    .collect(),
                reward: transitions.agents.iter().map(|b| b.reward[k]).collect(),
                next_obs: transitions
                    .agents
                    .iter()
                    .map(|b| b.next_obs_row(k).to_vec())
                    .collect(),
                is_terminated: transitions
                    .agents
                    .iter()
                    .map(|b| b.is_terminated[k])
                    .collect(),
                is_truncated: false,
            })?;
        }
        Ok(buffer)
    };

    let mut agent1 = Maddpg::build(agent_config(3))?;
    let mut agent2 = Maddpg::build(agent_config(3))?;
    let mut buffer1 = to_buffer()?;
    let mut buffer2 = to_buffer()?;

    for _ in 0..3 {
        agent1.opt_with_record(&mut buffer1)?;
        agent2.opt_with_record(&mut buffer2)?;
    }

    for i in 0..N_AGENTS {
        assert_eq!(
            agent1.trainer(i).export_params()?,
            agent2.trainer(i).export_params()?
        );
    }

    Ok(())
}

#[test]
fn test_checkpoint_round_trip() -> Result<()> {
    let mut agent = Maddpg::build(agent_config(42))?;
    let mut buffer = build_buffer()?;
    fill_buffer(&mut agent, &mut buffer, 32)?;
    agent.opt_with_record(&mut buffer)?;

    let dir = TempDir::new("maddpg")?;
    agent.save_params(dir.path())?;
    for i in 0..N_AGENTS {
        let agent_dir = dir.path().join(format!("agent_{}", i));
        for name in ["actor", "actor_tgt", "critic", "critic_tgt"] {
            assert!(agent_dir.join(format!("{}.safetensors", name)).exists());
        }
    }

    let mut agent_ = Maddpg::build(agent_config(7))?;
    agent_.load_params(dir.path())?;
    for i in 0..N_AGENTS {
        assert_eq!(
            agent.trainer(i).export_params()?,
            agent_.trainer(i).export_params()?
        );
    }

    Ok(())
}

#[test]
fn test_nan_reward_is_numeric_instability() -> Result<()> {
    let mut agent = Maddpg::build(agent_config(42).batch_size(4))?;
    let mut buffer = build_buffer()?;
    for _ in 0..4 {
        buffer.push(Transition {
            obs: vec![vec![0.0; OBS_DIM]; N_AGENTS],
            act: vec![vec![0.2; N_ACTIONS]; N_AGENTS],
            reward: vec![f32::NAN; N_AGENTS],
            next_obs: vec![vec![0.0; OBS_DIM]; N_AGENTS],
            is_terminated: vec![0; N_AGENTS],
            is_truncated: false,
        })?;
    }

    let err = agent.opt_with_record(&mut buffer).unwrap_err();
    assert!(is_numeric_instability(&err));

    Ok(())
}

#[test]
fn test_malformed_observation() -> Result<()> {
    let mut agent = Maddpg::build(agent_config(42))?;
    agent.train();

    let obs = vec![vec![0.0; OBS_DIM], vec![0.0; OBS_DIM + 1], vec![0.0; OBS_DIM]];
    let err = agent.sample(&obs).unwrap_err();
    assert_eq!(
        err.downcast_ref::<MaddpgError>(),
        Some(&MaddpgError::dim_mismatch(
            "observation of agent 1",
            OBS_DIM,
            OBS_DIM + 1
        ))
    );

    let err = agent.sample(&vec![vec![0.0; OBS_DIM]; 2]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MaddpgError>(),
        Some(MaddpgError::DimensionMismatch { .. })
    ));

    Ok(())
}

#[test]
fn test_local_q_func() -> Result<()> {
    let config = agent_config(42).local_q_func(vec![true, false, false]);
    let mut agent = Maddpg::build(config)?;
    let mut buffer = build_buffer()?;
    fill_buffer(&mut agent, &mut buffer, 32)?;

    let record = agent.opt_with_record(&mut buffer)?;
    assert!(record.get_scalar("agent_0_loss_actor")?.is_finite());

    // Local critic of agent 0 takes its own observation and action only
    let n_local = export_params(agent.trainer(0).critic().varmap())?.len();
    let n_central = export_params(agent.trainer(1).critic().varmap())?.len();
    let w0 = (OBS_DIM + N_ACTIONS) * 32;
    let w0_central = N_AGENTS * (OBS_DIM + N_ACTIONS) * 32;
    assert_eq!(n_central - n_local, w0_central - w0);

    Ok(())
}
