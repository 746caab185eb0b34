//! Citation identity resolution.
//!
//! Two references to the same work may spell its title differently and carry
//! different identifiers. Starting from seed titles, the resolver alternates
//! title → pub id and pub id → title aggregations until no new title appears.
//! Only structured pub ids (containing [`PUB_ID_SEPARATOR`]) link titles
//! together; bare numbers are ambiguous across works and never expand a class.

use std::collections::BTreeSet;

use citectx_index::{MAX_AGGREGATION_BUCKETS, RecordField, normalize_title};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::CiteError;
use crate::oracle::QueryOracle;

/// Separator marking a structured (DOI-like) identifier.
pub const PUB_ID_SEPARATOR: char = '/';

/// Default bucket cap per aggregation. Large enough that realistic fan-out
/// never hits it; hitting it is reported as an error.
pub const DEFAULT_MAX_BUCKETS: usize = 10_000;

/// Largest usable bucket cap. Each aggregation asks for one extra bucket so
/// that the empty pub id never counts against the cap.
pub const MAX_BUCKETS_LIMIT: usize = MAX_AGGREGATION_BUCKETS - 1;

/// Whether `pub_id` is reliable enough to link titles.
pub fn is_structured_pub_id(pub_id: &str) -> bool {
    pub_id.contains(PUB_ID_SEPARATOR)
}

/// Titles and pub ids judged to denote one work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EquivalenceClass {
    pub titles: BTreeSet<String>,
    /// Structured pub ids that linked the titles.
    pub pub_ids: BTreeSet<String>,
    /// Number of closure rounds run.
    pub rounds: usize,
    /// Size of the title set after each round.
    pub round_sizes: Vec<usize>,
}

pub struct Resolver<'a> {
    oracle: &'a dyn QueryOracle,
    max_buckets: usize,
}

impl<'a> Resolver<'a> {
    pub fn new(oracle: &'a dyn QueryOracle, max_buckets: usize) -> Self {
        Self {
            oracle,
            max_buckets: max_buckets.clamp(1, MAX_BUCKETS_LIMIT),
        }
    }

    /// Compute the equivalence class of `seeds`.
    pub async fn resolve<I, S>(&self, seeds: I) -> Result<EquivalenceClass, CiteError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.resolve_with_cancel(seeds, &CancellationToken::new())
            .await
    }

    /// Like [`resolve`](Self::resolve), checking `cancel` before each round.
    pub async fn resolve_with_cancel<I, S>(
        &self,
        seeds: I,
        cancel: &CancellationToken,
    ) -> Result<EquivalenceClass, CiteError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut class = EquivalenceClass {
            titles: seeds
                .into_iter()
                .map(|s| normalize_title(s.as_ref()))
                .filter(|t| !t.is_empty())
                .collect(),
            ..EquivalenceClass::default()
        };
        // Only titles first seen in the previous round need querying: the
        // pub ids of older titles are already in `class.pub_ids`.
        let mut frontier = class.titles.clone();

        while !frontier.is_empty() {
            if cancel.is_cancelled() {
                return Err(CiteError::Cancelled);
            }
            class.rounds += 1;

            let new_ids: BTreeSet<String> = self
                .titles_to_pub_ids(&frontier)
                .await?
                .into_iter()
                .filter(|id| is_structured_pub_id(id) && !class.pub_ids.contains(id))
                .collect();

            let new_titles: BTreeSet<String> = if new_ids.is_empty() {
                BTreeSet::new()
            } else {
                self.pub_ids_to_titles(&new_ids)
                    .await?
                    .into_iter()
                    .filter(|t| !class.titles.contains(t))
                    .collect()
            };

            class.pub_ids.extend(new_ids);
            class.titles.extend(new_titles.iter().cloned());
            class.round_sizes.push(class.titles.len());
            tracing::debug!(
                round = class.rounds,
                titles = class.titles.len(),
                pub_ids = class.pub_ids.len(),
                added = new_titles.len(),
                "closure round"
            );
            frontier = new_titles;
        }

        Ok(class)
    }

    /// Distinct non-empty pub ids carried by records with any of `titles`.
    pub async fn titles_to_pub_ids(
        &self,
        titles: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, CiteError> {
        self.cross(titles, RecordField::Title, RecordField::PubId)
            .await
    }

    /// Distinct non-empty titles of records carrying any of `pub_ids`.
    pub async fn pub_ids_to_titles(
        &self,
        pub_ids: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, CiteError> {
        self.cross(pub_ids, RecordField::PubId, RecordField::Title)
            .await
    }

    async fn cross(
        &self,
        values: &BTreeSet<String>,
        from: RecordField,
        to: RecordField,
    ) -> Result<BTreeSet<String>, CiteError> {
        if values.is_empty() {
            return Ok(BTreeSet::new());
        }
        let values: Vec<String> = values.iter().cloned().collect();
        let agg = self
            .oracle
            .terms(from, &values, to, self.max_buckets + 1)
            .await
            .map_err(|e| CiteError::ResolutionUnavailable(e.to_string()))?;
        let keys: BTreeSet<String> = agg
            .keys()
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect();
        if agg.truncated || keys.len() > self.max_buckets {
            return Err(CiteError::AggregationTruncated {
                field: to.to_string(),
                size: self.max_buckets,
            });
        }
        Ok(keys)
    }
}
