//! Query oracle trait and implementations.
//!
//! The oracle is the only view the resolver and locator have of the stored
//! reference records: a filter-by-field-membership query combined with either
//! a term aggregation or a capped record listing.

pub mod memory;
pub mod offline;

use std::future::Future;
use std::pin::Pin;

use citectx_index::{RecordField, ReferenceRecord, TermAggregation};
use thiserror::Error;

/// Failure talking to the backing store.
#[derive(Error, Debug, Clone)]
pub enum OracleError {
    #[error("{0} is unreachable: {1}")]
    Unreachable(String, String),
    #[error("query failed: {0}")]
    Query(String),
}

pub type OracleFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, OracleError>> + Send + 'a>>;

/// A term-aggregation query backend over reference records.
pub trait QueryOracle: Send + Sync {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Distinct values of `agg_field` among records whose `filter_field` is
    /// one of `values`, at most `size` buckets.
    fn terms<'a>(
        &'a self,
        filter_field: RecordField,
        values: &'a [String],
        agg_field: RecordField,
        size: usize,
    ) -> OracleFuture<'a, TermAggregation>;

    /// Records whose `field` is one of `values`, at most `limit` of them, in
    /// the backend's native order.
    fn records<'a>(
        &'a self,
        field: RecordField,
        values: &'a [String],
        limit: usize,
    ) -> OracleFuture<'a, Vec<ReferenceRecord>>;
}
