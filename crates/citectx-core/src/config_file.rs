use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Config;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub index: Option<IndexConfig>,
    pub resolve: Option<ResolveConfig>,
    pub context: Option<ContextConfig>,
    pub concurrency: Option<ConcurrencyConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexConfig {
    pub path: Option<String>,
    pub data_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveConfig {
    pub max_buckets: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextConfig {
    pub limit: Option<usize>,
    pub before: Option<usize>,
    pub after: Option<usize>,
    pub deterministic_order: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub num_workers: Option<usize>,
}

/// Platform config directory path: `<config_dir>/citectx/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("citectx").join("config.toml"))
}

/// Load config by cascading CWD `.citectx.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".citectx.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

/// Pick `overlay`'s value for a field, falling back to `base`'s.
fn pick<S, T>(
    base: &Option<S>,
    overlay: &Option<S>,
    field: impl Fn(&S) -> Option<T>,
) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        index: Some(IndexConfig {
            path: pick(&base.index, &overlay.index, |i| i.path.clone()),
            data_dir: pick(&base.index, &overlay.index, |i| i.data_dir.clone()),
        }),
        resolve: Some(ResolveConfig {
            max_buckets: pick(&base.resolve, &overlay.resolve, |r| r.max_buckets),
        }),
        context: Some(ContextConfig {
            limit: pick(&base.context, &overlay.context, |c| c.limit),
            before: pick(&base.context, &overlay.context, |c| c.before),
            after: pick(&base.context, &overlay.context, |c| c.after),
            deterministic_order: pick(&base.context, &overlay.context, |c| c.deterministic_order),
        }),
        concurrency: Some(ConcurrencyConfig {
            num_workers: pick(&base.concurrency, &overlay.concurrency, |c| c.num_workers),
        }),
    }
}

impl ConfigFile {
    /// Overwrite the fields of `config` that this file sets.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(index) = &self.index {
            if let Some(path) = &index.path {
                config.index_path = PathBuf::from(path);
            }
            if let Some(data_dir) = &index.data_dir {
                config.data_dir = PathBuf::from(data_dir);
            }
        }
        if let Some(max_buckets) = self.resolve.as_ref().and_then(|r| r.max_buckets) {
            config.max_buckets = max_buckets;
        }
        if let Some(context) = &self.context {
            if let Some(limit) = context.limit {
                config.citation_limit = limit;
            }
            if let Some(before) = context.before {
                config.context_before = before;
            }
            if let Some(after) = context.after {
                config.context_after = after;
            }
            if let Some(deterministic) = context.deterministic_order {
                config.deterministic_order = deterministic;
            }
        }
        if let Some(workers) = self.concurrency.as_ref().and_then(|c| c.num_workers) {
            config.num_workers = workers;
        }
    }
}
