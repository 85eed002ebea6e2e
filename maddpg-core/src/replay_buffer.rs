//! Replay buffer shared by all agents.
//!
//! Transitions are stored per agent as struct-of-arrays. Sampling draws one
//! index set per optimization step, and the same index set is used to gather
//! every agent's arrays, so all trainers see the same joint transitions.
//!
//! ```rust
//! use maddpg_core::{
//!     replay_buffer::{ReplayBuffer, ReplayBufferConfig, Transition},
//!     ExperienceBufferBase, ReplayBufferBase,
//! };
//!
//! let config = ReplayBufferConfig::default()
//!     .capacity(100)
//!     .dims(vec![2, 2], vec![3, 3]);
//! let mut buffer = ReplayBuffer::build(&config).unwrap();
//! buffer
//!     .push(Transition {
//!         obs: vec![vec![0.0; 2]; 2],
//!         act: vec![vec![1.0, 0.0, 0.0]; 2],
//!         reward: vec![1.0, 1.0],
//!         next_obs: vec![vec![0.5; 2]; 2],
//!         is_terminated: vec![0, 0],
//!         is_truncated: false,
//!     })
//!     .unwrap();
//!
//! let ixs = buffer.sample_indices(4).unwrap();
//! let batch = buffer.batch_with_indices(&ixs);
//! assert_eq!(batch.len(), 4);
//! assert_eq!(batch.agent(1).reward, vec![1.0; 4]);
//! ```
mod base;
mod batch;
mod config;
mod step_proc;
pub use base::ReplayBuffer;
pub use batch::{AgentBatch, JointBatch, Transition};
pub use config::ReplayBufferConfig;
pub use step_proc::StepProcessor;
