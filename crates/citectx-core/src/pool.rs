//! Worker pool for per-citation document fetch and context extraction.
//!
//! Each job is one located citation. A worker fetches the citing document,
//! extracts every window for the citation's marker on the blocking pool, and
//! answers on the job's oneshot channel. Windows of one citation come back in
//! document order; completion order across citations is not defined.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::CiteError;
use crate::extractor::{ContextExtractor, ContextWindow};
use crate::locator::Citation;
use crate::sentence::SentenceSplitter;
use crate::store::DocumentStore;

/// Context windows for one citation, or why there are none.
pub type ExtractionResult = Result<Vec<ContextWindow>, CiteError>;

/// A citation submitted to the pool.
pub struct ExtractionJob {
    pub citation: Citation,
    pub result_tx: oneshot::Sender<ExtractionResult>,
}

/// Window sizes, in characters, used by every worker.
#[derive(Debug, Clone, Copy)]
pub struct WindowSizes {
    pub before: usize,
    pub after: usize,
}

/// A fixed set of worker tasks consuming [`ExtractionJob`]s.
///
/// Submit jobs via [`submit()`](ExtractionPool::submit) and await the oneshot
/// receiver paired with each job.
pub struct ExtractionPool {
    job_tx: async_channel::Sender<ExtractionJob>,
    pool_handle: JoinHandle<()>,
}

impl ExtractionPool {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        splitter: Arc<dyn SentenceSplitter>,
        sizes: WindowSizes,
        cancel: CancellationToken,
        num_workers: usize,
    ) -> Self {
        let (job_tx, job_rx) = async_channel::unbounded::<ExtractionJob>();

        let pool_handle = tokio::spawn(async move {
            let mut handles = Vec::with_capacity(num_workers.max(1));
            for _ in 0..num_workers.max(1) {
                handles.push(tokio::spawn(worker_loop(
                    job_rx.clone(),
                    Arc::clone(&store),
                    Arc::clone(&splitter),
                    sizes,
                    cancel.clone(),
                )));
            }
            // Workers exit once the sender closes and the queue drains.
            drop(job_rx);
            for h in handles {
                let _ = h.await;
            }
        });

        Self {
            job_tx,
            pool_handle,
        }
    }

    pub async fn submit(&self, job: ExtractionJob) {
        let _ = self.job_tx.send(job).await;
    }

    /// Close the queue and wait for the workers to finish what was submitted.
    pub async fn shutdown(self) {
        self.job_tx.close();
        let _ = self.pool_handle.await;
    }
}

async fn worker_loop(
    rx: async_channel::Receiver<ExtractionJob>,
    store: Arc<dyn DocumentStore>,
    splitter: Arc<dyn SentenceSplitter>,
    sizes: WindowSizes,
    cancel: CancellationToken,
) {
    while let Ok(job) = rx.recv().await {
        let ExtractionJob {
            citation,
            result_tx,
        } = job;

        if cancel.is_cancelled() {
            tracing::debug!(file = %citation.citing_file, "skipping: cancelled");
            let _ = result_tx.send(Err(CiteError::Cancelled));
            continue;
        }

        // A panicking store or splitter takes down this task, not the worker.
        let task = tokio::spawn(process(
            citation.clone(),
            Arc::clone(&store),
            Arc::clone(&splitter),
            sizes,
        ));
        let result = task.await.unwrap_or_else(|e| {
            tracing::warn!(file = %citation.citing_file, error = %e, "extraction task failed");
            Err(CiteError::DocumentFetchFailed {
                file: citation.citing_file.clone(),
                reason: format!("extraction task failed: {e}"),
            })
        });
        let _ = result_tx.send(result);
    }
}

async fn process(
    citation: Citation,
    store: Arc<dyn DocumentStore>,
    splitter: Arc<dyn SentenceSplitter>,
    sizes: WindowSizes,
) -> ExtractionResult {
    let document = store.fetch(&citation.citing_file).await.map_err(|e| {
        tracing::warn!(file = %citation.citing_file, error = %e, "skipping document");
        CiteError::DocumentFetchFailed {
            file: citation.citing_file.clone(),
            reason: e.to_string(),
        }
    })?;

    let marker_id = citation.marker_id.clone();
    let file = citation.citing_file.clone();
    let windows = tokio::task::spawn_blocking(move || {
        ContextExtractor::new(splitter.as_ref(), sizes.before, sizes.after)
            .extract(&document, &marker_id)
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| CiteError::DocumentFetchFailed {
        file: file.clone(),
        reason: format!("extraction task failed: {e}"),
    })?;

    tracing::debug!(
        file = %file,
        marker_id = %citation.marker_id,
        windows = windows.len(),
        "extracted"
    );
    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sentence::RuleSplitter;
    use crate::store::{FetchError, FetchFuture};
    use std::collections::HashMap;

    struct MapStore(HashMap<String, String>);

    impl DocumentStore for MapStore {
        fn fetch<'a>(&'a self, citing_file: &'a str) -> FetchFuture<'a> {
            Box::pin(async move {
                self.0
                    .get(citing_file)
                    .cloned()
                    .ok_or_else(|| FetchError::NotFound(citing_file.to_string()))
            })
        }
    }

    fn citation(file: &str, marker: &str) -> Citation {
        Citation {
            citing_file: file.into(),
            marker_id: marker.into(),
        }
    }

    fn pool(cancel: CancellationToken) -> ExtractionPool {
        let store = MapStore(HashMap::from([(
            "a.xml".to_string(),
            r#"<p>First use <xref ref-type="bibr" rid="r1">1</xref> here. Second use <xref ref-type="bibr" rid="r1">1</xref> there.</p>"#
                .to_string(),
        )]));
        ExtractionPool::new(
            Arc::new(store),
            Arc::new(RuleSplitter),
            WindowSizes {
                before: 100,
                after: 100,
            },
            cancel,
            2,
        )
    }

    #[tokio::test]
    async fn extracts_in_document_order_and_reports_missing_files() {
        let pool = pool(CancellationToken::new());

        let (tx_ok, rx_ok) = oneshot::channel();
        pool.submit(ExtractionJob {
            citation: citation("a.xml", "r1"),
            result_tx: tx_ok,
        })
        .await;
        let (tx_missing, rx_missing) = oneshot::channel();
        pool.submit(ExtractionJob {
            citation: citation("gone.xml", "r1"),
            result_tx: tx_missing,
        })
        .await;

        let windows = rx_ok.await.unwrap().unwrap();
        let befores: Vec<&str> = windows.iter().map(|w| w.before.as_str()).collect();
        assert_eq!(befores, vec!["First use", "Second use"]);

        let err = rx_missing.await.unwrap().unwrap_err();
        assert!(matches!(err, CiteError::DocumentFetchFailed { ref file, .. } if file == "gone.xml"));

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn cancelled_jobs_are_skipped() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pool = pool(cancel);
        let (tx, rx) = oneshot::channel();
        pool.submit(ExtractionJob {
            citation: citation("a.xml", "r1"),
            result_tx: tx,
        })
        .await;
        assert!(matches!(rx.await.unwrap(), Err(CiteError::Cancelled)));
        pool.shutdown().await;
    }

    struct PanickyStore;

    impl DocumentStore for PanickyStore {
        fn fetch<'a>(&'a self, citing_file: &'a str) -> FetchFuture<'a> {
            Box::pin(async move {
                if citing_file == "bad.xml" {
                    panic!("store crashed");
                }
                Ok(r#"<p>Cited <xref ref-type="bibr" rid="r1">1</xref> here.</p>"#.to_string())
            })
        }
    }

    #[tokio::test]
    async fn panicking_fetch_fails_only_its_job() {
        let pool = ExtractionPool::new(
            Arc::new(PanickyStore),
            Arc::new(RuleSplitter),
            WindowSizes {
                before: 100,
                after: 100,
            },
            CancellationToken::new(),
            1,
        );
        let (tx_bad, rx_bad) = oneshot::channel();
        pool.submit(ExtractionJob {
            citation: citation("bad.xml", "r1"),
            result_tx: tx_bad,
        })
        .await;
        let (tx_good, rx_good) = oneshot::channel();
        pool.submit(ExtractionJob {
            citation: citation("good.xml", "r1"),
            result_tx: tx_good,
        })
        .await;

        let err = rx_bad.await.unwrap().unwrap_err();
        assert!(matches!(err, CiteError::DocumentFetchFailed { ref file, .. } if file == "bad.xml"));
        assert_eq!(rx_good.await.unwrap().unwrap().len(), 1);
        pool.shutdown().await;
    }
}
