//! Environment step.
use super::{JointAct, JointObs};

/// Represents the outcome of a joint action `(a_t, o_t+1, r_t)`.
///
/// An environment emits [`Step`] object at every interaction steps.
/// This object is used to create transitions `(o_t, a_t, o_t+1, r_t)`.
#[derive(Clone, Debug)]
pub struct Step {
    /// Joint action.
    pub act: JointAct,

    /// Joint observation after the step.
    pub obs: JointObs,

    /// Reward of each agent.
    pub reward: Vec<f32>,

    /// Terminal flag of each agent.
    pub is_terminated: Vec<i8>,

    /// Flag denoting if the episode is truncated, e.g., by a time limit.
    pub is_truncated: bool,
}

impl Step {
    /// Constructs a [`Step`] object.
    pub fn new(
        obs: JointObs,
        act: JointAct,
        reward: Vec<f32>,
        is_terminated: Vec<i8>,
        is_truncated: bool,
    ) -> Self {
        Step {
            act,
            obs,
            reward,
            is_terminated,
            is_truncated,
        }
    }

    /// All agents terminated or the episode is truncated.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.is_truncated || self.is_terminated.iter().all(|&d| d == 1)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_is_done() {
        let obs = vec![vec![0f32; 2]; 2];
        let act = vec![vec![0f32; 1]; 2];

        let step = Step::new(obs.clone(), act.clone(), vec![0.0; 2], vec![1, 0], false);
        assert!(!step.is_done());

        let step = Step::new(obs.clone(), act.clone(), vec![0.0; 2], vec![1, 1], false);
        assert!(step.is_done());

        let step = Step::new(obs, act, vec![0.0; 2], vec![0, 0], true);
        assert!(step.is_done());
    }
}
