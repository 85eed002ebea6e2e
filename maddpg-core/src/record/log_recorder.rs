use super::{AggregateRecorder, Record, RecordStorage, RecordValue, Recorder};
use log::info;

/// Aggregates stored records and writes them with [`log::info`].
///
/// Scalars are summarized by [`RecordStorage`]; the other values are written
/// as their most recent entry.
pub struct LogRecorder {
    storage: RecordStorage,
    prefix: String,
}

impl LogRecorder {
    /// Constructs a [`LogRecorder`]. `prefix` is prepended to every line.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            storage: RecordStorage::new(),
            prefix: prefix.into(),
        }
    }

    fn format(record: &Record) -> String {
        let mut items = record
            .iter()
            .map(|(k, v)| match v {
                RecordValue::Scalar(v) => format!("{}: {:.4}", k, v),
                RecordValue::String(s) => format!("{}: {}", k, s),
                RecordValue::DateTime(t) => format!("{}: {}", k, t.format("%H:%M:%S")),
            })
            .collect::<Vec<_>>();
        items.sort();
        items.join(", ")
    }
}

impl Default for LogRecorder {
    fn default() -> Self {
        Self::new("")
    }
}

impl Recorder for LogRecorder {
    fn write(&mut self, record: Record) {
        info!("{}{}", self.prefix, Self::format(&record));
    }
}

impl AggregateRecorder for LogRecorder {
    fn store(&mut self, record: Record) {
        self.storage.store(record);
    }

    fn flush(&mut self, step: i64) {
        let record = self.storage.aggregate();
        if !record.is_empty() {
            info!("{}opt_steps: {}, {}", self.prefix, step, Self::format(&record));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_format() {
        let record = Record::from_slice(&[
            ("loss_critic", RecordValue::Scalar(0.5)),
            ("scenario", RecordValue::String("simple_spread".into())),
            ("episode", RecordValue::Scalar(3.0)),
        ]);
        assert_eq!(
            LogRecorder::format(&record),
            "episode: 3.0000, loss_critic: 0.5000, scenario: simple_spread"
        );
    }
}
