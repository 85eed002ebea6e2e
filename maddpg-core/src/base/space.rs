//! Action spaces.
use serde::{Deserialize, Serialize};

/// Kind and size of the action of an agent.
///
/// Each agent fixes its action space for the lifetime of a run.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum ActionSpace {
    /// Probability distribution over `n` discrete actions.
    Discrete(usize),

    /// Continuous action vector of the given dimension, each element in `[-1, 1]`.
    Continuous(usize),
}

impl ActionSpace {
    /// Returns the length of the action vector.
    pub fn dim(&self) -> usize {
        match self {
            Self::Discrete(n) => *n,
            Self::Continuous(d) => *d,
        }
    }

    /// Returns `true` for a discrete action space.
    pub fn is_discrete(&self) -> bool {
        matches!(self, Self::Discrete(_))
    }
}
