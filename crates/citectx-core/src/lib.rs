use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod clean;
pub mod config_file;
pub mod extractor;
pub mod locator;
pub mod markup;
pub mod oracle;
pub mod pool;
pub mod resolver;
pub mod sentence;
pub mod store;

// Re-export for convenience
pub use citectx_index::{
    RecordField, ReferenceRecord, TermAggregation, TermBucket, normalize_title,
};
pub use extractor::{ContextExtractor, ContextWindow, extract};
pub use locator::{Citation, Locator};
pub use oracle::memory::MemoryOracle;
pub use oracle::offline::OfflineIndex;
pub use oracle::{OracleError, QueryOracle};
pub use pool::{ExtractionJob, ExtractionPool, WindowSizes};
pub use resolver::{DEFAULT_MAX_BUCKETS, EquivalenceClass, MAX_BUCKETS_LIMIT, Resolver};
pub use sentence::{RuleSplitter, SentenceSplitter};
pub use store::{DirStore, DocumentStore, FetchError};

#[derive(Error, Debug)]
pub enum CiteError {
    #[error("resolution unavailable: {0}")]
    ResolutionUnavailable(String),
    #[error("aggregation over {field} truncated at {size} buckets; raise max_buckets")]
    AggregationTruncated { field: String, size: usize },
    #[error("failed to fetch {file}: {reason}")]
    DocumentFetchFailed { file: String, reason: String },
    #[error("cancelled")]
    Cancelled,
    #[error("configuration error: {0}")]
    Config(String),
}

/// Configuration for a citation-context run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory of the reference index.
    pub index_path: PathBuf,
    /// Root that citing-file paths in the index are relative to.
    pub data_dir: PathBuf,
    /// Bucket cap for each resolver aggregation.
    pub max_buckets: usize,
    /// Maximum number of citations to locate.
    pub citation_limit: usize,
    /// Characters of cleaned text gathered before a marker.
    pub context_before: usize,
    /// Characters of cleaned text gathered after a marker.
    pub context_after: usize,
    pub num_workers: usize,
    /// Sort located citations by file and marker instead of index order.
    pub deterministic_order: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("citectx_index"),
            data_dir: PathBuf::from("data"),
            max_buckets: DEFAULT_MAX_BUCKETS,
            citation_limit: 10,
            context_before: 100,
            context_after: 100,
            num_workers: 4,
            deterministic_order: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), CiteError> {
        if self.max_buckets == 0 {
            return Err(CiteError::Config("max_buckets must be at least 1".into()));
        }
        if self.max_buckets > MAX_BUCKETS_LIMIT {
            return Err(CiteError::Config(format!(
                "max_buckets must be at most {MAX_BUCKETS_LIMIT}"
            )));
        }
        if self.num_workers == 0 {
            return Err(CiteError::Config("num_workers must be at least 1".into()));
        }
        Ok(())
    }
}

/// The external services a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub oracle: Arc<dyn QueryOracle>,
    pub store: Arc<dyn DocumentStore>,
    pub splitter: Arc<dyn SentenceSplitter>,
}

/// Progress events emitted during an inspection.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Resolved {
        titles: usize,
        pub_ids: usize,
        rounds: usize,
    },
    Located {
        citations: usize,
    },
    DocumentDone {
        citing_file: String,
        marker_id: String,
        windows: usize,
    },
    DocumentSkipped {
        citing_file: String,
        reason: String,
    },
}

/// One context window together with the citation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationContext {
    pub citing_file: String,
    pub marker_id: String,
    #[serde(flatten)]
    pub window: ContextWindow,
}

/// Everything found for one seed title.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InspectionReport {
    pub class: EquivalenceClass,
    pub citations: Vec<Citation>,
    /// Windows grouped by citation in locator order; within a citation, in
    /// document order.
    pub contexts: Vec<CitationContext>,
    /// Citing files that could not be fetched.
    pub failed: Vec<String>,
}

/// Resolve `title`, locate its citations and extract their context windows.
///
/// Oracle failures abort the run. Documents that cannot be fetched are
/// skipped, reported through `progress`, and listed in
/// [`InspectionReport::failed`].
pub async fn inspect_title(
    title: &str,
    config: &Config,
    collaborators: &Collaborators,
    progress: impl Fn(ProgressEvent) + Send + Sync,
    cancel: CancellationToken,
) -> Result<InspectionReport, CiteError> {
    config.validate()?;
    let oracle = collaborators.oracle.as_ref();

    let class = Resolver::new(oracle, config.max_buckets)
        .resolve_with_cancel([title], &cancel)
        .await?;
    progress(ProgressEvent::Resolved {
        titles: class.titles.len(),
        pub_ids: class.pub_ids.len(),
        rounds: class.rounds,
    });

    let citations = Locator::new(oracle)
        .deterministic(config.deterministic_order)
        .locate(&class.titles, config.citation_limit)
        .await?;
    progress(ProgressEvent::Located {
        citations: citations.len(),
    });

    let mut report = InspectionReport {
        class,
        citations,
        ..InspectionReport::default()
    };
    if report.citations.is_empty() {
        return Ok(report);
    }

    let pool = ExtractionPool::new(
        Arc::clone(&collaborators.store),
        Arc::clone(&collaborators.splitter),
        WindowSizes {
            before: config.context_before,
            after: config.context_after,
        },
        cancel.clone(),
        config.num_workers,
    );

    let mut receivers = Vec::with_capacity(report.citations.len());
    for citation in &report.citations {
        if cancel.is_cancelled() {
            break;
        }
        let (result_tx, result_rx) = tokio::sync::oneshot::channel();
        pool.submit(ExtractionJob {
            citation: citation.clone(),
            result_tx,
        })
        .await;
        receivers.push((citation.clone(), result_rx));
    }

    for (citation, rx) in receivers {
        match rx.await {
            Ok(Ok(windows)) => {
                progress(ProgressEvent::DocumentDone {
                    citing_file: citation.citing_file.clone(),
                    marker_id: citation.marker_id.clone(),
                    windows: windows.len(),
                });
                report
                    .contexts
                    .extend(windows.into_iter().map(|window| CitationContext {
                        citing_file: citation.citing_file.clone(),
                        marker_id: citation.marker_id.clone(),
                        window,
                    }));
            }
            Ok(Err(CiteError::DocumentFetchFailed { file, reason })) => {
                progress(ProgressEvent::DocumentSkipped {
                    citing_file: file.clone(),
                    reason,
                });
                if !report.failed.contains(&file) {
                    report.failed.push(file);
                }
            }
            Ok(Err(CiteError::Cancelled)) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    file = %citation.citing_file,
                    marker = %citation.marker_id,
                    error = %e,
                    "extraction failed"
                );
            }
            Err(_) => {
                tracing::warn!(
                    file = %citation.citing_file,
                    marker = %citation.marker_id,
                    "extraction worker stopped before answering"
                );
            }
        }
    }

    pool.shutdown().await;

    if cancel.is_cancelled() {
        return Err(CiteError::Cancelled);
    }
    tracing::info!(
        title,
        titles = report.class.titles.len(),
        citations = report.citations.len(),
        contexts = report.contexts.len(),
        failed = report.failed.len(),
        "inspection complete"
    );
    Ok(report)
}
