use std::sync::Arc;

use citectx_index::{RecordField, ReferenceIndex, ReferenceRecord, TermAggregation};

use super::{OracleError, OracleFuture, QueryOracle};

/// Oracle backed by a local Tantivy reference index.
///
/// Index reads are blocking, so each call runs on the blocking pool.
pub struct OfflineIndex {
    pub index: Arc<ReferenceIndex>,
}

impl OfflineIndex {
    pub fn new(index: ReferenceIndex) -> Self {
        Self {
            index: Arc::new(index),
        }
    }
}

fn query_error(e: impl std::fmt::Display) -> OracleError {
    OracleError::Query(e.to_string())
}

impl QueryOracle for OfflineIndex {
    fn name(&self) -> &str {
        "reference index"
    }

    fn terms<'a>(
        &'a self,
        filter_field: RecordField,
        values: &'a [String],
        agg_field: RecordField,
        size: usize,
    ) -> OracleFuture<'a, TermAggregation> {
        let index = Arc::clone(&self.index);
        let values = values.to_vec();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                index
                    .terms(Some((filter_field, &values)), agg_field, size)
                    .map_err(query_error)
            })
            .await
            .map_err(|e| OracleError::Unreachable(self.name().to_string(), e.to_string()))?
        })
    }

    fn records<'a>(
        &'a self,
        field: RecordField,
        values: &'a [String],
        limit: usize,
    ) -> OracleFuture<'a, Vec<ReferenceRecord>> {
        let index = Arc::clone(&self.index);
        let values = values.to_vec();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                index.search(field, &values, limit).map_err(query_error)
            })
            .await
            .map_err(|e| OracleError::Unreachable(self.name().to_string(), e.to_string()))?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(file: &str, marker: &str, title: &str, pub_id: &str) -> ReferenceRecord {
        ReferenceRecord {
            citing_file: file.into(),
            marker_id: marker.into(),
            title: title.into(),
            pub_id: pub_id.into(),
        }
    }

    #[tokio::test]
    async fn answers_through_blocking_pool() {
        let index = ReferenceIndex::create_in_ram().unwrap();
        index
            .add_records(&[
                record("a.xml", "b1", "deep learning", "10.1/x"),
                record("b.xml", "b2", "deep learning (nature)", "10.1/x"),
            ])
            .unwrap();
        let oracle = OfflineIndex::new(index);

        let ids = vec!["10.1/x".to_string()];
        let agg = oracle
            .terms(RecordField::PubId, &ids, RecordField::Title, 10)
            .await
            .unwrap();
        assert_eq!(agg.buckets.len(), 2);

        let titles = vec!["deep learning".to_string()];
        let hits = oracle.records(RecordField::Title, &titles, 10).await.unwrap();
        assert_eq!(hits, vec![record("a.xml", "b1", "deep learning", "10.1/x")]);
    }
}
