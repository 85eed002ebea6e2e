//! Cooperative navigation in a 2D particle world.
//!
//! `n` agents must cover `n` landmarks while avoiding collisions with each
//! other. All agents receive the same reward.
use anyhow::Result;
use maddpg_core::{
    error::MaddpgError,
    record::{Record, RecordValue::Scalar},
    ActionSpace, Env, JointAct, JointObs, Step,
};
use serde::{Deserialize, Serialize};

const DT: f32 = 0.1;
const DAMPING: f32 = 0.25;
const SENSITIVITY: f32 = 5.0;
const AGENT_SIZE: f32 = 0.15;
const OCCUPIED_DIST: f32 = 0.1;
const CONTACT_FORCE: f32 = 1e2;
const CONTACT_MARGIN: f32 = 1e-3;

/// Configuration of [`SimpleSpread`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct SimpleSpreadConfig {
    /// The number of agents, also the number of landmarks.
    pub n_agents: usize,

    /// Agents take 2D continuous forces instead of 5 discrete moves.
    pub continuous: bool,
}

impl Default for SimpleSpreadConfig {
    fn default() -> Self {
        Self {
            n_agents: 3,
            continuous: false,
        }
    }
}

impl SimpleSpreadConfig {
    /// Sets the number of agents.
    pub fn n_agents(mut self, v: usize) -> Self {
        self.n_agents = v;
        self
    }

    /// Sets the kind of action.
    pub fn continuous(mut self, v: bool) -> Self {
        self.continuous = v;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Vec2(f32, f32);

impl Vec2 {
    fn sub(self, o: Self) -> Self {
        Self(self.0 - o.0, self.1 - o.1)
    }

    fn norm(self) -> f32 {
        (self.0 * self.0 + self.1 * self.1).sqrt()
    }
}

/// Cooperative navigation environment.
///
/// The observation of an agent consists of its velocity, its position, the
/// positions of the landmarks and of the other agents relative to it, and a
/// silent communication channel of the other agents (all zeros). With 3
/// agents, this is 18 values.
///
/// Discrete actions are probability vectors over
/// `[noop, +x, -x, +y, -y]`; the force is the difference of the weights of
/// opposite moves. Continuous actions are forces in `[-1, 1]^2`.
pub struct SimpleSpread {
    config: SimpleSpreadConfig,
    seed: u64,
    rng: fastrand::Rng,
    pos: Vec<Vec2>,
    vel: Vec<Vec2>,
    landmarks: Vec<Vec2>,
}

impl SimpleSpread {
    fn n(&self) -> usize {
        self.config.n_agents
    }

    fn obs_dim(&self) -> usize {
        4 + 2 * self.n() + 4 * (self.n() - 1)
    }

    fn uniform(&mut self) -> Vec2 {
        Vec2(
            2.0 * self.rng.f32() - 1.0,
            2.0 * self.rng.f32() - 1.0,
        )
    }

    fn reset_world(&mut self) -> JointObs {
        let n = self.n();
        self.pos = (0..n).map(|_| self.uniform()).collect();
        self.vel = vec![Vec2::default(); n];
        self.landmarks = (0..n).map(|_| self.uniform()).collect();
        self.observe()
    }

    fn observe(&self) -> JointObs {
        (0..self.n())
            .map(|i| {
                let p = self.pos[i];
                let mut obs = Vec::with_capacity(self.obs_dim());
                obs.extend([self.vel[i].0, self.vel[i].1, p.0, p.1]);
                for l in self.landmarks.iter() {
                    let d = l.sub(p);
                    obs.extend([d.0, d.1]);
                }
                for (j, q) in self.pos.iter().enumerate() {
                    if j != i {
                        let d = q.sub(p);
                        obs.extend([d.0, d.1]);
                    }
                }
                obs.extend(std::iter::repeat(0.0).take(2 * (self.n() - 1)));
                obs
            })
            .collect()
    }

    fn control(&self, act: &[f32]) -> Vec2 {
        let u = match self.config.continuous {
            true => Vec2(act[0].clamp(-1.0, 1.0), act[1].clamp(-1.0, 1.0)),
            false => Vec2(act[1] - act[2], act[3] - act[4]),
        };
        Vec2(u.0 * SENSITIVITY, u.1 * SENSITIVITY)
    }

    /// Soft repulsion between overlapping agents.
    fn contact_forces(&self) -> Vec<Vec2> {
        let n = self.n();
        let mut forces = vec![Vec2::default(); n];
        let dist_min = 2.0 * AGENT_SIZE;
        for a in 0..n {
            for b in (a + 1)..n {
                let delta = self.pos[a].sub(self.pos[b]);
                let dist = delta.norm().max(1e-6);
                let penetration =
                    (1.0 + (-(dist - dist_min) / CONTACT_MARGIN).exp()).ln() * CONTACT_MARGIN;
                let f = CONTACT_FORCE * penetration / dist;
                forces[a].0 += f * delta.0;
                forces[a].1 += f * delta.1;
                forces[b].0 -= f * delta.0;
                forces[b].1 -= f * delta.1;
            }
        }
        forces
    }

    /// Returns the number of pairs of overlapping agents.
    fn n_collisions(&self) -> usize {
        let n = self.n();
        (0..n)
            .flat_map(|a| ((a + 1)..n).map(move |b| (a, b)))
            .filter(|&(a, b)| self.pos[a].sub(self.pos[b]).norm() < 2.0 * AGENT_SIZE)
            .count()
    }

    /// Returns the distance from each landmark to the closest agent.
    fn min_dists(&self) -> Vec<f32> {
        self.landmarks
            .iter()
            .map(|l| {
                self.pos
                    .iter()
                    .map(|p| p.sub(*l).norm())
                    .fold(f32::INFINITY, f32::min)
            })
            .collect()
    }

    fn check_act(&self, act: &JointAct) -> Result<()> {
        if act.len() != self.n() {
            return Err(MaddpgError::dim_mismatch("number of actions", self.n(), act.len()).into());
        }
        let dim = self.act_space().dim();
        for (i, a) in act.iter().enumerate() {
            if a.len() != dim {
                return Err(
                    MaddpgError::dim_mismatch(format!("action of agent {}", i), dim, a.len())
                        .into(),
                );
            }
        }
        Ok(())
    }

    fn act_space(&self) -> ActionSpace {
        match self.config.continuous {
            true => ActionSpace::Continuous(2),
            false => ActionSpace::Discrete(5),
        }
    }
}

impl Env for SimpleSpread {
    type Config = SimpleSpreadConfig;

    fn build(config: &Self::Config, seed: i64) -> Result<Self> {
        if config.n_agents < 2 {
            anyhow::bail!("simple_spread needs at least 2 agents, got {}", config.n_agents);
        }
        let seed = seed as u64;
        let mut env = Self {
            config: config.clone(),
            seed,
            rng: fastrand::Rng::with_seed(seed),
            pos: vec![],
            vel: vec![],
            landmarks: vec![],
        };
        env.reset_world();
        Ok(env)
    }

    fn obs_dims(&self) -> Vec<usize> {
        vec![self.obs_dim(); self.n()]
    }

    fn act_spaces(&self) -> Vec<ActionSpace> {
        vec![self.act_space(); self.n()]
    }

    fn step(&mut self, act: &JointAct) -> Result<(Step, Record)> {
        self.check_act(act)?;
        let n = self.n();

        let contact = self.contact_forces();
        for i in 0..n {
            let u = self.control(&act[i]);
            let v = &mut self.vel[i];
            v.0 = v.0 * (1.0 - DAMPING) + (u.0 + contact[i].0) * DT;
            v.1 = v.1 * (1.0 - DAMPING) + (u.1 + contact[i].1) * DT;
            let p = &mut self.pos[i];
            p.0 += v.0 * DT;
            p.1 += v.1 * DT;
        }

        let min_dists = self.min_dists();
        let collisions = self.n_collisions();
        let occupied = min_dists.iter().filter(|&&d| d < OCCUPIED_DIST).count();
        let reward = -min_dists.iter().sum::<f32>() - collisions as f32;

        let step = Step::new(
            self.observe(),
            act.clone(),
            vec![reward; n],
            vec![0; n],
            false,
        );
        let record = Record::from_slice(&[
            ("collisions", Scalar(collisions as f32)),
            ("min_dist", Scalar(min_dists.iter().sum::<f32>())),
            ("occupied_landmarks", Scalar(occupied as f32)),
        ]);

        Ok((step, record))
    }

    fn reset(&mut self) -> Result<JointObs> {
        Ok(self.reset_world())
    }

    /// Reseeds the world with `seed + ix`, so evaluation episodes are reproducible.
    fn reset_with_index(&mut self, ix: usize) -> Result<JointObs> {
        self.rng = fastrand::Rng::with_seed(self.seed.wrapping_add(ix as u64));
        Ok(self.reset_world())
    }
}
