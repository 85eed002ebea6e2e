//! Types and traits for recording training metrics.
//!
//! * [`Record`] - A container for storing key-value pairs of various data types
//! * [`RecordValue`] - Values that can be stored in a [`Record`]
//! * [`Recorder`] and [`AggregateRecorder`] - Destinations of records
//! * [`RecordStorage`] - Aggregation of stored records
//! * [`LogRecorder`] - Aggregates records and writes them with the `log` crate
//! * [`BufferedRecorder`] - Keeps records in memory, used in evaluation and tests
//! * [`NullRecorder`] - Discards all records
//!
//! ```rust
//! use maddpg_core::record::{Record, RecordValue};
//!
//! let mut record = Record::empty();
//! record.insert("episode", RecordValue::Scalar(1.0));
//! record.insert("agent_0_reward", RecordValue::Scalar(-1.5));
//! record.insert("scenario", RecordValue::String("simple_spread".into()));
//! assert_eq!(record.get_scalar("episode").unwrap(), 1.0);
//! ```
mod base;
mod buffered_recorder;
mod log_recorder;
mod null_recorder;
mod recorder;
mod storage;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use log_recorder::LogRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::{AggregateRecorder, Recorder};
pub use storage::RecordStorage;
