//! Corpus walk + JATS parsing + Tantivy indexing of reference lists.

use std::path::{Path, PathBuf};

use tantivy::doc;
use tantivy::{Index, IndexWriter};
use tokio_util::sync::CancellationToken;

use crate::jats::parse_ref_list;
use crate::metadata::BuildLog;
use crate::schema::RecordField;
use crate::{BuildProgress, IndexError, ReferenceIndex, ReferenceRecord};

/// Writer heap budget; packages are small so this stays modest.
const WRITER_HEAP_BYTES: usize = 64_000_000;

/// Options for [`build_index`](crate::build_index).
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Maximum number of articles to collect from the data directory.
    pub max_articles: usize,
    /// Articles per package; each package is parsed together and committed once.
    pub package_size: usize,
    /// Number of packages parsed concurrently.
    pub workers: usize,
    /// Remove the existing index before building.
    pub delete_index: bool,
    /// Stops the build between packages. Committed packages stay indexed, so a
    /// later run picks up where this one stopped.
    pub cancel: CancellationToken,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            max_articles: 10_000,
            package_size: 50,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            delete_index: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// Recursively collect at most `max` files ending in `xml` under `data_dir`,
/// in sorted path order.
pub fn collect_articles(data_dir: &Path, max: usize) -> Result<Vec<PathBuf>, IndexError> {
    let mut articles = Vec::new();
    let mut pending = vec![data_dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect::<Vec<_>>();
        entries.sort();
        // Reverse so the stack pops subdirectories in sorted order.
        for path in entries.into_iter().rev() {
            if path.is_dir() {
                pending.push(path);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with("xml"))
            {
                articles.push(path);
            }
        }
    }
    articles.sort();
    articles.truncate(max);
    Ok(articles)
}

/// Split the article list into packages of at most `size` articles.
pub fn package_articles(articles: Vec<PathBuf>, size: usize) -> Vec<Vec<PathBuf>> {
    let size = size.max(1);
    let mut packages = Vec::with_capacity(articles.len().div_ceil(size));
    let mut iter = articles.into_iter().peekable();
    while iter.peek().is_some() {
        packages.push(iter.by_ref().take(size).collect());
    }
    packages
}

/// Path of `article` relative to `data_dir`, with `/` separators.
fn relative_name(data_dir: &Path, article: &Path) -> String {
    let rel = article.strip_prefix(data_dir).unwrap_or(article);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn open_writer(index: &Index) -> Result<IndexWriter, IndexError> {
    Ok(index.writer(WRITER_HEAP_BYTES)?)
}

pub(crate) fn write_records(
    index: &Index,
    writer: &mut IndexWriter,
    records: &[ReferenceRecord],
) -> Result<u64, IndexError> {
    let schema = index.schema();
    let file = RecordField::CitingFile.resolve(&schema)?;
    let ref_id = RecordField::MarkerId.resolve(&schema)?;
    let title = RecordField::Title.resolve(&schema)?;
    let pub_id = RecordField::PubId.resolve(&schema)?;

    for record in records {
        writer.add_document(doc!(
            file => record.citing_file.as_str(),
            ref_id => record.marker_id.as_str(),
            title => record.title.as_str(),
            pub_id => record.pub_id.as_str(),
        ))?;
    }
    Ok(records.len() as u64)
}

/// Outcome of parsing one package of articles.
struct PackageResult {
    records: Vec<ReferenceRecord>,
    articles: u64,
    failed: Vec<(String, String)>,
}

fn parse_package(data_dir: &Path, package: Vec<PathBuf>) -> PackageResult {
    let mut result = PackageResult {
        records: Vec::new(),
        articles: 0,
        failed: Vec::new(),
    };
    for article in package {
        let name = relative_name(data_dir, &article);
        let parsed = std::fs::read(&article)
            .map_err(IndexError::from)
            .and_then(|bytes| {
                String::from_utf8(bytes).map_err(|e| IndexError::Parse(e.to_string()))
            })
            .and_then(|content| parse_ref_list(&content));
        match parsed {
            Ok(refs) => {
                result.articles += 1;
                result
                    .records
                    .extend(refs.into_iter().map(|r| ReferenceRecord {
                        citing_file: name.clone(),
                        marker_id: r.ref_id,
                        title: r.title,
                        pub_id: r.pub_id,
                    }));
            }
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "skipping article");
                result.failed.push((name, e.to_string()));
            }
        }
    }
    result
}

pub async fn build(
    index_path: &Path,
    data_dir: &Path,
    options: BuildOptions,
    mut progress: impl FnMut(BuildProgress),
) -> Result<u64, IndexError> {
    if options.delete_index && index_path.exists() {
        tracing::info!(path = %index_path.display(), "deleting existing index");
        std::fs::remove_dir_all(index_path)?;
    }
    let index = ReferenceIndex::open_or_create(index_path)?;

    // Step 1: collect article paths
    let dir = data_dir.to_path_buf();
    let max = options.max_articles;
    let articles = tokio::task::spawn_blocking(move || collect_articles(&dir, max))
        .await
        .map_err(|e| IndexError::Index(e.to_string()))??;
    progress(BuildProgress::Collecting {
        articles_found: articles.len() as u64,
    });

    // Step 2: drop articles that were indexed by an earlier run
    let mut already_indexed = 0u64;
    let mut fresh = Vec::with_capacity(articles.len());
    for article in articles {
        if index.contains_file(&relative_name(data_dir, &article))? {
            already_indexed += 1;
        } else {
            fresh.push(article);
        }
    }
    let packages = package_articles(fresh, options.package_size);
    let packages_total = packages.len() as u64;

    // Step 3: parse packages concurrently, commit each as it arrives
    let mut writer = open_writer(&index.index)?;
    let mut in_flight = tokio::task::JoinSet::new();
    let mut package_iter = packages.into_iter();
    for _ in 0..options.workers.max(1) {
        if let Some(package) = package_iter.next() {
            let dir = data_dir.to_path_buf();
            in_flight.spawn_blocking(move || parse_package(&dir, package));
        }
    }

    let mut packages_done = 0u64;
    let mut articles_indexed = 0u64;
    let mut records_indexed = 0u64;
    let mut failed_files = Vec::new();
    let mut cancelled = false;

    loop {
        let joined = tokio::select! {
            biased;
            _ = options.cancel.cancelled() => {
                cancelled = true;
                break;
            }
            joined = in_flight.join_next() => joined,
        };
        let Some(joined) = joined else { break };
        let package = joined.map_err(|e| IndexError::Index(format!("parse task panicked: {e}")))?;

        records_indexed += write_records(&index.index, &mut writer, &package.records)?;
        writer.commit()?;
        articles_indexed += package.articles;
        packages_done += 1;

        for (file, error) in package.failed {
            progress(BuildProgress::ArticleSkipped {
                file: file.clone(),
                error,
            });
            failed_files.push(file);
        }
        progress(BuildProgress::PackageComplete {
            packages_done,
            packages_total,
            articles_indexed,
            records_indexed,
        });

        if let Some(package) = package_iter.next() {
            let dir = data_dir.to_path_buf();
            in_flight.spawn_blocking(move || parse_package(&dir, package));
        }
    }

    if cancelled {
        // Parses already running finish on the blocking pool; their output is dropped.
        in_flight.abort_all();
        tracing::warn!(packages_done, packages_total, "index build cancelled");
    }

    progress(BuildProgress::Committing { records_indexed });
    writer.wait_merging_threads()?;
    index.reload()?;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let mut log = BuildLog::load(index_path)?;
    log.record_build(records_indexed, articles_indexed, now);
    log.store(index_path)?;

    if cancelled {
        return Err(IndexError::Cancelled { records_indexed });
    }

    tracing::info!(
        articles = articles_indexed,
        records = records_indexed,
        already_indexed,
        failed = failed_files.len(),
        "index build complete"
    );
    progress(BuildProgress::Complete {
        articles: articles_indexed,
        records: records_indexed,
        already_indexed,
        failed_files,
    });

    Ok(records_indexed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<article>
  <body><p>Text <xref ref-type="bibr" rid="b1">1</xref>.</p></body>
  <back><ref-list>
    <ref id="b1"><element-citation>
      <article-title>Deep Learning</article-title>
      <pub-id pub-id-type="doi">10.1038/nature14539</pub-id>
    </element-citation></ref>
  </ref-list></back>
</article>"#;

    fn write_corpus(dir: &Path) {
        std::fs::create_dir_all(dir.join("journal_a")).unwrap();
        std::fs::create_dir_all(dir.join("journal_b")).unwrap();
        std::fs::write(dir.join("journal_a/one.xml"), ARTICLE).unwrap();
        std::fs::write(dir.join("journal_b/two.nxml"), ARTICLE).unwrap();
        std::fs::write(dir.join("journal_b/notes.txt"), "ignored").unwrap();
        std::fs::write(dir.join("journal_b/broken.xml"), [0xff, 0xfe, 0x00]).unwrap();
    }

    #[test]
    fn collects_xml_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        let found = collect_articles(dir.path(), 10).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| relative_name(dir.path(), p))
            .collect();
        assert_eq!(
            names,
            vec!["journal_a/one.xml", "journal_b/broken.xml", "journal_b/two.nxml"]
        );
        assert_eq!(collect_articles(dir.path(), 1).unwrap().len(), 1);
    }

    #[test]
    fn packages_split_evenly() {
        let articles: Vec<PathBuf> = (0..5).map(|i| PathBuf::from(format!("{i}.xml"))).collect();
        let packages = package_articles(articles, 2);
        assert_eq!(
            packages.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
        assert!(package_articles(Vec::new(), 2).is_empty());
    }

    #[tokio::test]
    async fn build_indexes_and_skips_existing() {
        let data = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        write_corpus(data.path());

        let mut events = Vec::new();
        let added = build(
            index_dir.path(),
            data.path(),
            BuildOptions {
                package_size: 1,
                workers: 2,
                ..BuildOptions::default()
            },
            |e| events.push(e),
        )
        .await
        .unwrap();
        assert_eq!(added, 2);
        assert!(events.iter().any(|e| matches!(
            e,
            BuildProgress::ArticleSkipped { file, .. } if file == "journal_b/broken.xml"
        )));

        let index = ReferenceIndex::open(index_dir.path()).unwrap();
        assert!(index.contains_file("journal_a/one.xml").unwrap());
        assert_eq!(index.record_count(), 2);
        let log = index.info().unwrap();
        assert_eq!((log.records, log.articles, log.builds), (2, 2, 1));
        drop(index);

        // Second run only retries the article that failed to parse.
        let added = build(
            index_dir.path(),
            data.path(),
            BuildOptions::default(),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(added, 0);
    }

    #[tokio::test]
    async fn cancelled_build_stops_and_can_resume() {
        let data = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        write_corpus(data.path());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = build(
            index_dir.path(),
            data.path(),
            BuildOptions {
                package_size: 1,
                cancel,
                ..BuildOptions::default()
            },
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IndexError::Cancelled { records_indexed: 0 }));
        assert_eq!(ReferenceIndex::open(index_dir.path()).unwrap().record_count(), 0);

        let added = build(
            index_dir.path(),
            data.path(),
            BuildOptions::default(),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(added, 2);
    }
}
