#![warn(missing_docs)]
//! Core abstractions for multi-agent reinforcement learning.
//!
//! Agents act simultaneously in a shared environment. Each agent maps its own
//! observation to its own action, while transitions of all agents are stored
//! in a single [`replay_buffer::ReplayBuffer`] and sampled with one index set
//! per optimization step.
pub mod dummy;
pub mod error;
pub mod record;
pub mod replay_buffer;

mod base;
pub use base::{
    ActionSpace, Agent, Configurable, Env, ExperienceBufferBase, JointAct, JointObs, Policy,
    ReplayBufferBase, Step,
};

mod evaluator;
pub use evaluator::{DefaultEvaluator, Evaluator};

mod trainer;
pub use trainer::{Sampler, Trainer, TrainerConfig};
