//! Filtered term aggregations and record lookups over the reference index.

use serde::Deserialize;
use tantivy::aggregation::AggregationCollector;
use tantivy::aggregation::agg_req::Aggregations;
use tantivy::aggregation::agg_result::AggregationResults;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{AllQuery, Query, TermQuery, TermSetQuery};
use tantivy::schema::*;
use tantivy::{Index, IndexReader, Term};

use crate::schema::RecordField;
use crate::{IndexError, ReferenceRecord, TermAggregation, TermBucket};

const AGG_NAME: &str = "by_key";

/// Tantivy's default cap on the buckets one aggregation request may return.
pub const MAX_AGGREGATION_BUCKETS: usize = 65_000;

#[derive(Deserialize)]
struct TermsResult {
    buckets: Vec<RawBucket>,
    #[serde(default)]
    sum_other_doc_count: u64,
}

#[derive(Deserialize)]
struct RawBucket {
    key: serde_json::Value,
    doc_count: u64,
}

fn membership_query(
    schema: &Schema,
    field: RecordField,
    values: &[String],
) -> Result<Box<dyn Query>, IndexError> {
    let field = field.resolve(schema)?;
    let terms: Vec<Term> = values
        .iter()
        .map(|v| Term::from_field_text(field, v))
        .collect();
    Ok(Box::new(TermSetQuery::new(terms)))
}

/// Terms aggregation over `agg_field`, optionally restricted by field membership.
pub fn terms(
    index: &Index,
    reader: &IndexReader,
    filter: Option<(RecordField, &[String])>,
    agg_field: RecordField,
    size: usize,
) -> Result<TermAggregation, IndexError> {
    if size == 0 {
        return Ok(TermAggregation::default());
    }
    let schema = index.schema();
    let query: Box<dyn Query> = match filter {
        Some((_, values)) if values.is_empty() => return Ok(TermAggregation::default()),
        Some((field, values)) => membership_query(&schema, field, values)?,
        None => Box::new(AllQuery),
    };

    let request: Aggregations = serde_json::from_value(serde_json::json!({
        AGG_NAME: {
            "terms": {
                "field": agg_field.as_str(),
                "size": size,
                // Keep per-segment candidate lists at least as large as the
                // request so that `sum_other_doc_count` reflects real overflow.
                "segment_size": size
                    .saturating_mul(10)
                    .min(MAX_AGGREGATION_BUCKETS)
                    .max(size),
            }
        }
    }))
    .map_err(|e| IndexError::Parse(e.to_string()))?;

    let collector = AggregationCollector::from_aggs(request, Default::default());
    let searcher = reader.searcher();
    let results: AggregationResults = searcher.search(query.as_ref(), &collector)?;

    let json = serde_json::to_value(&results).map_err(|e| IndexError::Parse(e.to_string()))?;
    let Some(raw) = json.get(AGG_NAME) else {
        return Ok(TermAggregation::default());
    };
    let parsed: TermsResult =
        serde_json::from_value(raw.clone()).map_err(|e| IndexError::Parse(e.to_string()))?;

    let buckets = parsed
        .buckets
        .into_iter()
        .filter_map(|b| match b.key {
            serde_json::Value::String(key) => Some(TermBucket {
                key,
                count: b.doc_count,
            }),
            _ => None,
        })
        .collect();

    Ok(TermAggregation {
        buckets,
        truncated: parsed.sum_other_doc_count > 0,
    })
}

/// Records matching field membership, in the searcher's result order.
pub fn search(
    index: &Index,
    reader: &IndexReader,
    field: RecordField,
    values: &[String],
    limit: usize,
) -> Result<Vec<ReferenceRecord>, IndexError> {
    if limit == 0 || values.is_empty() {
        return Ok(Vec::new());
    }
    let schema = index.schema();
    let query = membership_query(&schema, field, values)?;

    let searcher = reader.searcher();
    let top_docs = searcher.search(query.as_ref(), &TopDocs::with_limit(limit))?;

    let fields = RecordField::ALL
        .iter()
        .map(|f| f.resolve(&schema))
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = Vec::with_capacity(top_docs.len());
    for (_score, address) in top_docs {
        let doc = searcher.doc::<TantivyDocument>(address)?;
        let value = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };
        records.push(ReferenceRecord {
            citing_file: value(fields[0]),
            marker_id: value(fields[1]),
            title: value(fields[2]),
            pub_id: value(fields[3]),
        });
    }
    Ok(records)
}

/// Whether any record has `field == value`.
pub fn contains(
    index: &Index,
    reader: &IndexReader,
    field: RecordField,
    value: &str,
) -> Result<bool, IndexError> {
    let field = field.resolve(&index.schema())?;
    let query = TermQuery::new(
        Term::from_field_text(field, value),
        IndexRecordOption::Basic,
    );
    Ok(reader.searcher().search(&query, &Count)? > 0)
}
