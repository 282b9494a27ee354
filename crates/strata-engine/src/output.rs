//! Output sink: where query results wait until a client picks them up.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use strata_core::value::Record;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRecord {
    pub timestamp_ms: u64,
    pub record: Record,
}

/// Receives the records each statement emits.
///
/// Methods are infallible: a sink must never fail the statement feeding it.
pub trait OutputSink: Send + Sync {
    fn push(&self, query: &str, group: Option<&str>, records: &[Record]);

    /// Forget a query and anything it buffered.
    fn remove(&self, query: &str, group: Option<&str>);

    /// Take everything buffered for `query`.
    fn pop(&self, query: &str) -> Vec<OutputRecord>;

    /// Read everything buffered for `query` without taking it.
    fn fetch(&self, query: &str) -> Vec<OutputRecord>;

    /// Take everything buffered for every query in `group`.
    fn sweep(&self, group: Option<&str>) -> BTreeMap<String, Vec<OutputRecord>>;
}

#[derive(Debug, Default)]
struct Buffer {
    group: Option<String>,
    records: VecDeque<OutputRecord>,
}

/// In-memory `OutputSink` with an optional per-query cap; the oldest records
/// are dropped first.
#[derive(Debug, Default)]
pub struct OutputPool {
    limit: Option<usize>,
    buffers: Mutex<BTreeMap<String, Buffer>>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl OutputPool {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            buffers: Mutex::new(BTreeMap::new()),
        }
    }

    fn buffers(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Buffer>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffered record count for `query`.
    pub fn len(&self, query: &str) -> usize {
        self.buffers().get(query).map_or(0, |b| b.records.len())
    }
}

impl OutputSink for OutputPool {
    fn push(&self, query: &str, group: Option<&str>, records: &[Record]) {
        let ts = now_ms();
        let mut buffers = self.buffers();
        let buf = buffers.entry(query.to_string()).or_insert_with(|| Buffer {
            group: group.map(str::to_string),
            records: VecDeque::new(),
        });
        for r in records {
            buf.records.push_back(OutputRecord {
                timestamp_ms: ts,
                record: r.clone(),
            });
        }
        if let Some(limit) = self.limit {
            while buf.records.len() > limit {
                buf.records.pop_front();
            }
        }
    }

    fn remove(&self, query: &str, group: Option<&str>) {
        let mut buffers = self.buffers();
        if buffers
            .get(query)
            .is_some_and(|b| b.group.as_deref() == group)
        {
            buffers.remove(query);
        }
    }

    fn pop(&self, query: &str) -> Vec<OutputRecord> {
        self.buffers()
            .get_mut(query)
            .map(|b| b.records.drain(..).collect())
            .unwrap_or_default()
    }

    fn fetch(&self, query: &str) -> Vec<OutputRecord> {
        self.buffers()
            .get(query)
            .map(|b| b.records.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn sweep(&self, group: Option<&str>) -> BTreeMap<String, Vec<OutputRecord>> {
        self.buffers()
            .iter_mut()
            .filter(|(_, b)| b.group.as_deref() == group && !b.records.is_empty())
            .map(|(q, b)| (q.clone(), b.records.drain(..).collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::value::Value;

    fn rec(n: i64) -> Record {
        [("n".to_string(), Value::Long(n))].into_iter().collect()
    }

    #[test]
    fn pop_drains_and_fetch_does_not() {
        let pool = OutputPool::new(None);
        pool.push("q", None, &[rec(1), rec(2)]);
        assert_eq!(pool.fetch("q").len(), 2);
        assert_eq!(pool.pop("q").len(), 2);
        assert!(pool.pop("q").is_empty());
        assert!(pool.pop("missing").is_empty());
    }

    #[test]
    fn limit_drops_oldest_first() {
        let pool = OutputPool::new(Some(2));
        pool.push("q", None, &[rec(1), rec(2), rec(3)]);
        let kept: Vec<_> = pool.pop("q").into_iter().map(|o| o.record).collect();
        assert_eq!(kept, vec![rec(2), rec(3)]);
    }

    #[test]
    fn sweep_takes_one_group() {
        let pool = OutputPool::new(None);
        pool.push("a", Some("g"), &[rec(1)]);
        pool.push("b", Some("g"), &[rec(2)]);
        pool.push("c", None, &[rec(3)]);
        let swept = pool.sweep(Some("g"));
        assert_eq!(swept.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(pool.len("c"), 1);
        assert_eq!(pool.len("a"), 0);
    }

    #[test]
    fn remove_matches_group() {
        let pool = OutputPool::new(None);
        pool.push("q", Some("g"), &[rec(1)]);
        pool.remove("q", None);
        assert_eq!(pool.len("q"), 1);
        pool.remove("q", Some("g"));
        assert_eq!(pool.len("q"), 0);
    }
}
