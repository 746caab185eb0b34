//! Raw document access.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("I/O error reading {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not valid UTF-8")]
    Decode(String),
}

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<String, FetchError>> + Send + 'a>>;

/// Maps a citing-file identifier to the article's raw markup.
pub trait DocumentStore: Send + Sync {
    fn fetch<'a>(&'a self, citing_file: &'a str) -> FetchFuture<'a>;
}

/// Documents stored as files under a data directory, addressed by their path
/// relative to it (the form the index records them in).
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `citing_file` under the root. Absolute paths and `..`
    /// components are rejected.
    fn resolve(&self, citing_file: &str) -> Option<PathBuf> {
        let relative = Path::new(citing_file.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl DocumentStore for DirStore {
    fn fetch<'a>(&'a self, citing_file: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            let path = self
                .resolve(citing_file)
                .ok_or_else(|| FetchError::NotFound(citing_file.to_string()))?;
            let bytes = tokio::fs::read(&path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    FetchError::NotFound(citing_file.to_string())
                } else {
                    FetchError::Io {
                        file: citing_file.to_string(),
                        source: e,
                    }
                }
            })?;
            String::from_utf8(bytes).map_err(|_| FetchError::Decode(citing_file.to_string()))
        })
    }
}
