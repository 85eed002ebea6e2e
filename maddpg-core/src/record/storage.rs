//! Record storage and aggregation.
use super::{Record, RecordValue};
use log::warn;
use std::collections::HashSet;
use xxhash_rust::xxh3::Xxh3Builder;

/// A storage of records with aggregation.
///
/// Scalar values are aggregated to their minimum, maximum, mean and median.
/// For the other types, the most recent value is kept.
#[derive(Default)]
pub struct RecordStorage {
    data: Vec<Record>,
}

fn min(vs: &[f32]) -> RecordValue {
    RecordValue::Scalar(vs.iter().copied().fold(f32::INFINITY, f32::min))
}

fn max(vs: &[f32]) -> RecordValue {
    RecordValue::Scalar(vs.iter().copied().fold(f32::NEG_INFINITY, f32::max))
}

fn mean(vs: &[f32]) -> RecordValue {
    RecordValue::Scalar(vs.iter().sum::<f32>() / vs.len() as f32)
}

fn median(mut vs: Vec<f32>) -> RecordValue {
    vs.sort_by(|x, y| x.total_cmp(y));
    RecordValue::Scalar(vs[vs.len() / 2])
}

impl RecordStorage {
    /// Creates a new empty record storage.
    pub fn new() -> Self {
        Self { data: vec![] }
    }

    /// Stores a record in the storage.
    pub fn store(&mut self, record: Record) {
        self.data.push(record);
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if no record is stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn get_keys(&self) -> HashSet<String, Xxh3Builder> {
        let mut keys = HashSet::<String, Xxh3Builder>::default();
        for record in self.data.iter() {
            for k in record.keys() {
                keys.insert(k.clone());
            }
        }
        keys
    }

    fn latest(&self, key: &str) -> Option<Record> {
        self.data
            .iter()
            .rev()
            .find_map(|record| record.get(key))
            .map(|value| Record::from_slice(&[(key, value.clone())]))
    }

    fn scalar(&self, key: &str) -> Record {
        let vs: Vec<f32> = self
            .data
            .iter()
            .filter_map(|record| match record.get(key) {
                Some(RecordValue::Scalar(v)) => Some(*v),
                Some(_) => {
                    warn!("Non-scalar value for {} is ignored in aggregation", key);
                    None
                }
                None => None,
            })
            .collect();

        match vs.len() {
            0 => Record::empty(),
            1 => Record::from_slice(&[(key, RecordValue::Scalar(vs[0]))]),
            _ => Record::from_slice(&[
                (format!("{}_min", key), min(&vs)),
                (format!("{}_max", key), max(&vs)),
                (format!("{}_mean", key), mean(&vs)),
                (format!("{}_median", key), median(vs)),
            ]),
        }
    }

    /// Aggregates all stored records and clears the storage.
    pub fn aggregate(&mut self) -> Record {
        let mut record = Record::empty();

        for key in self.get_keys().iter() {
            let is_scalar = self
                .data
                .iter()
                .find_map(|r| r.get(key))
                .map(|v| matches!(v, RecordValue::Scalar(_)))
                .unwrap_or(false);
            let r = match is_scalar {
                true => self.scalar(key),
                false => self.latest(key).unwrap_or_default(),
            };
            record.merge_inplace(r);
        }

        self.data.clear();

        record
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_aggregate_scalars() {
        let mut storage = RecordStorage::new();
        for v in [1.0f32, 3.0, 2.0] {
            storage.store(Record::from_scalar("loss_critic", v));
        }
        storage.store(Record::from_slice(&[(
            "scenario",
            RecordValue::String("simple_spread".into()),
        )]));
        storage.store(Record::from_scalar("eval_reward", -4.0));

        let r = storage.aggregate();
        assert_eq!(r.get_scalar("loss_critic_min").unwrap(), 1.0);
        assert_eq!(r.get_scalar("loss_critic_max").unwrap(), 3.0);
        assert_eq!(r.get_scalar("loss_critic_mean").unwrap(), 2.0);
        assert_eq!(r.get_scalar("loss_critic_median").unwrap(), 2.0);
        assert_eq!(r.get_scalar("eval_reward").unwrap(), -4.0);
        assert_eq!(r.get_string("scenario").unwrap(), "simple_spread");
        assert!(storage.is_empty());
    }
}
