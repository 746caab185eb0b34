//! Offline reference index builder and querier.
//!
//! Stores one document per bibliographic reference found in the `<ref-list>`
//! of a corpus of JATS articles. The `title` and `pub_id` fields are
//! raw-tokenized fast fields so the index can answer filtered term
//! aggregations ("which pub ids co-occur with these titles?") as well as
//! filtered record lookups ("which articles cite these titles?").

mod builder;
mod jats;
mod metadata;
mod normalize;
mod query;
mod schema;

use std::path::{Path, PathBuf};

use tantivy::{Index, IndexReader};
use thiserror::Error;

pub use builder::{BuildOptions, collect_articles, package_articles};
pub use jats::{ParsedRef, parse_ref_list};
pub use metadata::{BuildLog, SCHEMA_VERSION};
pub use normalize::normalize_title;
pub use query::MAX_AGGREGATION_BUCKETS;
pub use schema::RecordField;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index error: {0}")]
    Index(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("build cancelled after {records_indexed} records")]
    Cancelled { records_indexed: u64 },
}

impl From<tantivy::TantivyError> for IndexError {
    fn from(e: tantivy::TantivyError) -> Self {
        IndexError::Index(e.to_string())
    }
}

/// One bibliographic reference inside one citing article.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceRecord {
    /// Article path, relative to the corpus data directory.
    pub citing_file: String,
    /// The `id` of the `<ref>` element; citation markers point at it via `rid`.
    pub marker_id: String,
    /// Normalized (lowercased) article title.
    pub title: String,
    /// External identifier, empty when the reference carries none.
    pub pub_id: String,
}

impl ReferenceRecord {
    /// Value of `field` on this record.
    pub fn get(&self, field: RecordField) -> &str {
        match field {
            RecordField::CitingFile => &self.citing_file,
            RecordField::MarkerId => &self.marker_id,
            RecordField::Title => &self.title,
            RecordField::PubId => &self.pub_id,
        }
    }
}

/// One term-aggregation bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermBucket {
    pub key: String,
    pub count: u64,
}

/// Result of a term aggregation, ordered by descending count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermAggregation {
    pub buckets: Vec<TermBucket>,
    /// More distinct keys matched than the requested bucket size.
    pub truncated: bool,
}

impl TermAggregation {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().map(|b| b.key.as_str())
    }
}

/// Progress events emitted while building the index.
#[derive(Debug, Clone)]
pub enum BuildProgress {
    Collecting {
        articles_found: u64,
    },
    /// One package of articles has been parsed and committed.
    PackageComplete {
        packages_done: u64,
        packages_total: u64,
        articles_indexed: u64,
        records_indexed: u64,
    },
    /// An article could not be read or parsed and was left out.
    ArticleSkipped {
        file: String,
        error: String,
    },
    Committing {
        records_indexed: u64,
    },
    Complete {
        articles: u64,
        records: u64,
        already_indexed: u64,
        failed_files: Vec<String>,
    },
}

/// Handle to an opened reference index.
pub struct ReferenceIndex {
    index: Index,
    reader: IndexReader,
    path: Option<PathBuf>,
}

impl ReferenceIndex {
    /// Open an existing index directory.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        BuildLog::load(path)?.check_schema()?;
        let index = Index::open_in_dir(path)?;
        Self::from_index(index, Some(path.to_path_buf()))
    }

    /// Open the index at `path`, creating an empty one if the directory holds none.
    pub fn open_or_create(path: &Path) -> Result<Self, IndexError> {
        std::fs::create_dir_all(path)?;
        BuildLog::load(path)?.check_schema()?;
        let dir = tantivy::directory::MmapDirectory::open(path)
            .map_err(|e| IndexError::Index(e.to_string()))?;
        let index = Index::open_or_create(dir, schema::build_schema())?;
        Self::from_index(index, Some(path.to_path_buf()))
    }

    /// Create an empty in-memory index.
    pub fn create_in_ram() -> Result<Self, IndexError> {
        let index = Index::create_in_ram(schema::build_schema());
        Self::from_index(index, None)
    }

    fn from_index(index: Index, path: Option<PathBuf>) -> Result<Self, IndexError> {
        let reader = index
            .reader_builder()
            .reload_policy(tantivy::ReloadPolicy::Manual)
            .try_into()
            .map_err(|e: tantivy::TantivyError| IndexError::Index(e.to_string()))?;
        Ok(Self {
            index,
            reader,
            path,
        })
    }

    /// Term aggregation over `agg_field`, restricted to records whose
    /// `filter_field` equals one of `values`. `None` aggregates over all records.
    pub fn terms(
        &self,
        filter: Option<(RecordField, &[String])>,
        agg_field: RecordField,
        size: usize,
    ) -> Result<TermAggregation, IndexError> {
        query::terms(&self.index, &self.reader, filter, agg_field, size)
    }

    /// Records whose `field` equals one of `values`, at most `limit` of them.
    pub fn search(
        &self,
        field: RecordField,
        values: &[String],
        limit: usize,
    ) -> Result<Vec<ReferenceRecord>, IndexError> {
        query::search(&self.index, &self.reader, field, values, limit)
    }

    /// The `n` most frequently cited titles.
    pub fn most_cited(&self, n: usize) -> Result<Vec<TermBucket>, IndexError> {
        Ok(self.terms(None, RecordField::Title, n)?.buckets)
    }

    /// Whether any record was indexed from `citing_file`.
    pub fn contains_file(&self, citing_file: &str) -> Result<bool, IndexError> {
        query::contains(&self.index, &self.reader, RecordField::CitingFile, citing_file)
    }

    /// Number of records visible to the current reader.
    pub fn record_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Add records and commit them.
    pub fn add_records(&self, records: &[ReferenceRecord]) -> Result<u64, IndexError> {
        let mut writer = builder::open_writer(&self.index)?;
        let added = builder::write_records(&self.index, &mut writer, records)?;
        writer.commit()?;
        self.reload()?;
        Ok(added)
    }

    /// Make the latest commit visible to queries.
    pub fn reload(&self) -> Result<(), IndexError> {
        self.reader.reload()?;
        Ok(())
    }

    /// Build history of the index. In-memory indexes have an empty log.
    pub fn info(&self) -> Result<BuildLog, IndexError> {
        match &self.path {
            Some(path) => BuildLog::load(path),
            None => Ok(BuildLog::default()),
        }
    }

    /// Get the path to the index directory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Parse the articles under `data_dir` and index their reference lists.
///
/// Articles already present in the index are skipped. Returns the number of
/// records added.
pub async fn build_index(
    index_path: &Path,
    data_dir: &Path,
    options: BuildOptions,
    progress: impl FnMut(BuildProgress),
) -> Result<u64, IndexError> {
    builder::build(index_path, data_dir, options, progress).await
}
