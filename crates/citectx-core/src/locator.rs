use std::collections::BTreeSet;

use citectx_index::RecordField;
use serde::Serialize;

use crate::CiteError;
use crate::oracle::QueryOracle;

/// One place where a reference is cited: the citing article and the id the
/// article's citation markers use for that reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Citation {
    pub citing_file: String,
    pub marker_id: String,
}

/// Finds the articles citing any title of an equivalence class.
pub struct Locator<'a> {
    oracle: &'a dyn QueryOracle,
    deterministic: bool,
}

impl<'a> Locator<'a> {
    pub fn new(oracle: &'a dyn QueryOracle) -> Self {
        Self {
            oracle,
            deterministic: false,
        }
    }

    /// Sort results by `(citing_file, marker_id)` instead of keeping the
    /// oracle's order.
    pub fn deterministic(mut self, yes: bool) -> Self {
        self.deterministic = yes;
        self
    }

    /// At most `limit` citations of records whose title is in `titles`.
    pub async fn locate(
        &self,
        titles: &BTreeSet<String>,
        limit: usize,
    ) -> Result<Vec<Citation>, CiteError> {
        if titles.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let values: Vec<String> = titles.iter().cloned().collect();
        let records = self
            .oracle
            .records(RecordField::Title, &values, limit)
            .await
            .map_err(|e| CiteError::ResolutionUnavailable(e.to_string()))?;

        let mut citations: Vec<Citation> = records
            .into_iter()
            .take(limit)
            .map(|r| Citation {
                citing_file: r.citing_file,
                marker_id: r.marker_id,
            })
            .collect();
        if self.deterministic {
            citations.sort();
        }
        tracing::debug!(
            titles = titles.len(),
            citations = citations.len(),
            "located citations"
        );
        Ok(citations)
    }
}
