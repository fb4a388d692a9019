//! Dataset access (spec §4.M). Dataset loaders/trace CSV readers beyond the
//! replay contract are explicitly out of scope (spec §1), so this trait is
//! the whole surface a concrete dataset integration needs to fill in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;

/// Supplies one record of request payload data per call, keyed by service
/// name. Implementations own whatever caching/loading strategy they need;
/// the frontend only calls `next_record` once per replayed arrival.
pub trait DatasetOracle: Send + Sync {
    fn next_record(&self, service_name: &str) -> HashMap<String, Value>;
}

/// A fixed pool of records, cycled round-robin. Useful for tests and for
/// standing in when no real dataset loader is wired up.
pub struct StaticDatasetOracle {
    records: Vec<HashMap<String, Value>>,
    cursor: AtomicUsize,
}

impl StaticDatasetOracle {
    pub fn new(records: Vec<HashMap<String, Value>>) -> Self {
        Self { records, cursor: AtomicUsize::new(0) }
    }
}

impl DatasetOracle for StaticDatasetOracle {
    fn next_record(&self, _service_name: &str) -> HashMap<String, Value> {
        if self.records.is_empty() {
            return HashMap::new();
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.records.len();
        self.records[idx].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cycles_through_records_round_robin() {
        let mut first = HashMap::new();
        first.insert("topic".to_string(), json!("a"));
        let mut second = HashMap::new();
        second.insert("topic".to_string(), json!("b"));

        let oracle = StaticDatasetOracle::new(vec![first.clone(), second.clone()]);
        assert_eq!(oracle.next_record("draft"), first);
        assert_eq!(oracle.next_record("draft"), second);
        assert_eq!(oracle.next_record("draft"), first);
    }

    #[test]
    fn empty_pool_yields_empty_record() {
        let oracle = StaticDatasetOracle::new(vec![]);
        assert!(oracle.next_record("draft").is_empty());
    }
}
