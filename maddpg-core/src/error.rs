//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MaddpgError {
    /// The replay buffer holds fewer transitions than an optimization step requires.
    ///
    /// This error is not fatal. The caller is expected to skip the optimization step.
    #[error("Insufficient data in the replay buffer: {len} transitions stored, {required} required")]
    InsufficientData {
        /// The number of transitions in the buffer.
        len: usize,

        /// The number of transitions required.
        required: usize,
    },

    /// The size of a vector disagrees with the configured shape.
    #[error("Dimension mismatch in {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// What was checked.
        what: String,

        /// The configured size.
        expected: usize,

        /// The given size.
        actual: usize,
    },

    /// A loss or a parameter became NaN or infinite.
    #[error("Numeric instability: {0}")]
    NumericInstability(String),

    /// A configuration value is out of its valid range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueTypeError(String),
}

impl MaddpgError {
    /// Shorthand for [`MaddpgError::DimensionMismatch`].
    pub fn dim_mismatch(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }
}

/// Returns `true` if the error is [`MaddpgError::InsufficientData`].
pub fn is_insufficient_data(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<MaddpgError>(),
        Some(MaddpgError::InsufficientData { .. })
    )
}

/// Returns `true` if the error is [`MaddpgError::NumericInstability`].
pub fn is_numeric_instability(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<MaddpgError>(),
        Some(MaddpgError::NumericInstability(_))
    )
}
