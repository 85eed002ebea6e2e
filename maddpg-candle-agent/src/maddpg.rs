//! Multi-agent deep deterministic policy gradient (MADDPG).
//!
//! [`Maddpg`] holds one [`AgentTrainer`] per agent. In an optimization step,
//! one index set is sampled from the shared replay buffer, target actions of
//! all agents are computed from their target actors, then the trainers are
//! updated one after another on the same batch.
mod actor;
mod agent_trainer;
mod base;
mod config;
mod critic;
pub use actor::Actor;
pub use agent_trainer::{critic_target, AgentTrainer};
pub use base::Maddpg;
pub use config::MaddpgConfig;
pub use critic::Critic;
