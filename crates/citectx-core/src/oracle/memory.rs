//! In-memory oracle over a fixed list of reference records.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use citectx_index::{RecordField, ReferenceRecord, TermAggregation, TermBucket};

use super::{OracleError, OracleFuture, QueryOracle};

/// Oracle answering from records held in memory.
///
/// Buckets are ordered by descending count, then by key; records come back in
/// insertion order. Useful for small corpora and for tests, where
/// [`set_unreachable`](MemoryOracle::set_unreachable) simulates an outage and
/// [`call_count`](MemoryOracle::call_count) counts queries.
pub struct MemoryOracle {
    records: Vec<ReferenceRecord>,
    outage: Mutex<Option<String>>,
    call_count: AtomicUsize,
}

impl MemoryOracle {
    pub fn new(records: Vec<ReferenceRecord>) -> Self {
        Self {
            records,
            outage: Mutex::new(None),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent query fail with `reason`; `None` restores service.
    pub fn set_unreachable(&self, reason: Option<&str>) {
        if let Ok(mut outage) = self.outage.lock() {
            *outage = reason.map(String::from);
        }
    }

    /// How many queries have been issued.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), OracleError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let outage = self
            .outage
            .lock()
            .map_err(|e| OracleError::Query(e.to_string()))?;
        match outage.as_ref() {
            Some(reason) => Err(OracleError::Unreachable(
                self.name().to_string(),
                reason.clone(),
            )),
            None => Ok(()),
        }
    }

    fn matching<'a>(
        &'a self,
        field: RecordField,
        values: &'a [String],
    ) -> impl Iterator<Item = &'a ReferenceRecord> + 'a {
        let wanted: HashSet<&str> = values.iter().map(String::as_str).collect();
        self.records
            .iter()
            .filter(move |r| wanted.contains(r.get(field)))
    }

    fn aggregate(
        &self,
        filter_field: RecordField,
        values: &[String],
        agg_field: RecordField,
        size: usize,
    ) -> TermAggregation {
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for record in self.matching(filter_field, values) {
            *counts.entry(record.get(agg_field)).or_default() += 1;
        }
        let mut buckets: Vec<TermBucket> = counts
            .into_iter()
            .map(|(key, count)| TermBucket {
                key: key.to_string(),
                count,
            })
            .collect();
        buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        let truncated = buckets.len() > size;
        buckets.truncate(size);
        TermAggregation { buckets, truncated }
    }
}

impl QueryOracle for MemoryOracle {
    fn name(&self) -> &str {
        "memory"
    }

    fn terms<'a>(
        &'a self,
        filter_field: RecordField,
        values: &'a [String],
        agg_field: RecordField,
        size: usize,
    ) -> OracleFuture<'a, TermAggregation> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.aggregate(filter_field, values, agg_field, size))
        })
    }

    fn records<'a>(
        &'a self,
        field: RecordField,
        values: &'a [String],
        limit: usize,
    ) -> OracleFuture<'a, Vec<ReferenceRecord>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.matching(field, values).take(limit).cloned().collect())
        })
    }
}
