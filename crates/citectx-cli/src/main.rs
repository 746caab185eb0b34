use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use citectx_core::config_file::{self, ConfigFile};
use citectx_core::{Collaborators, Config, DirStore, OfflineIndex, Resolver, RuleSplitter};
use citectx_index::{BuildOptions, BuildProgress, IndexError, ReferenceIndex};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

mod output;

use output::ColorMode;

/// Citation context explorer - resolve title variants and show how a work is cited
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index the reference lists of the JATS articles under a data directory
    Index {
        /// Data directory; xml files are collected recursively
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Path of the reference index
        #[arg(long)]
        index: Option<PathBuf>,

        /// Maximum number of articles to index
        #[arg(long, default_value_t = 10_000)]
        n_articles: usize,

        /// Articles parsed and committed together
        #[arg(long, default_value_t = 50)]
        package_size: usize,

        /// Remove the existing index first
        #[arg(long)]
        delete_index: bool,

        /// Number of packages parsed concurrently
        #[arg(long)]
        workers: Option<usize>,
    },

    /// List the most cited titles in the index
    MostCited {
        /// Path of the reference index
        #[arg(long)]
        index: Option<PathBuf>,

        /// Number of titles to show
        #[arg(short, long, default_value_t = 10)]
        n: usize,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Show every title and pub id judged to denote the same work as TITLE
    Resolve {
        title: String,

        /// Path of the reference index
        #[arg(long)]
        index: Option<PathBuf>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Print the sentences around citations of TITLE
    Contexts {
        title: String,

        /// Path of the reference index
        #[arg(long)]
        index: Option<PathBuf>,

        /// Data directory the indexed article paths are relative to
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Maximum number of citations to fetch
        #[arg(short, long)]
        n: Option<usize>,

        /// Characters of context gathered before each citation
        #[arg(long)]
        context_before: Option<usize>,

        /// Characters of context gathered after each citation
        #[arg(long)]
        context_after: Option<usize>,

        /// Number of documents processed concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Order citations by file and marker id instead of index order
        #[arg(long)]
        deterministic: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Index {
            data_dir,
            index,
            n_articles,
            package_size,
            delete_index,
            workers,
        } => {
            let config = resolve_config(index, data_dir, workers);
            let options = BuildOptions {
                max_articles: n_articles,
                package_size: package_size.max(1),
                workers: workers.unwrap_or_else(|| BuildOptions::default().workers),
                delete_index,
                cancel: cancel_on_ctrl_c(),
            };
            build_index(&config, options).await
        }
        Command::MostCited { index, n, no_color } => {
            let config = resolve_config(index, None, None);
            most_cited(&config, n, ColorMode(!no_color)).await
        }
        Command::Resolve {
            title,
            index,
            no_color,
        } => {
            let config = resolve_config(index, None, None);
            resolve(&config, &title, ColorMode(!no_color)).await
        }
        Command::Contexts {
            title,
            index,
            data_dir,
            n,
            context_before,
            context_after,
            workers,
            deterministic,
            json,
            no_color,
        } => {
            let mut config = resolve_config(index, data_dir, workers);
            if let Some(n) = n {
                config.citation_limit = n;
            }
            if let Some(before) = context_before {
                config.context_before = before;
            }
            if let Some(after) = context_after {
                config.context_after = after;
            }
            config.deterministic_order |= deterministic;
            contexts(&config, &title, json, ColorMode(!no_color)).await
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Resolve configuration: CLI flags > env vars > config file > defaults.
fn resolve_config(
    index: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    workers: Option<usize>,
) -> Config {
    let config = layer_config(
        config_file::load_config(),
        |key| std::env::var(key).ok(),
        Overrides {
            index,
            data_dir,
            workers,
        },
    );
    tracing::debug!(?config, "resolved configuration");
    config
}

/// Values given on the command line.
#[derive(Debug, Default)]
struct Overrides {
    index: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    workers: Option<usize>,
}

fn layer_config(
    file: ConfigFile,
    env: impl Fn(&str) -> Option<String>,
    flags: Overrides,
) -> Config {
    let mut config = Config::default();
    file.apply_to(&mut config);

    if let Some(path) = flags
        .index
        .or_else(|| env("CITECTX_INDEX").map(PathBuf::from))
    {
        config.index_path = path;
    }
    if let Some(dir) = flags
        .data_dir
        .or_else(|| env("CITECTX_DATA_DIR").map(PathBuf::from))
    {
        config.data_dir = dir;
    }
    if let Some(n) = flags
        .workers
        .or_else(|| env("CITECTX_WORKERS").and_then(|v| v.parse().ok()))
    {
        config.num_workers = n.max(1);
    }
    config
}

fn open_index(path: &Path) -> anyhow::Result<ReferenceIndex> {
    if !path.exists() {
        anyhow::bail!(
            "Reference index not found at {}. Build it with: citectx index --index {} --data-dir <DIR>",
            path.display(),
            path.display()
        );
    }
    Ok(ReferenceIndex::open(path)?)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });
    cancel
}

async fn build_index(config: &Config, options: BuildOptions) -> anyhow::Result<()> {
    use indicatif::{HumanCount, ProgressBar, ProgressStyle};
    use std::time::Duration;

    if !config.data_dir.is_dir() {
        anyhow::bail!("Data directory not found: {}", config.data_dir.display());
    }

    let bar_style = ProgressStyle::with_template(
        "{spinner:.green} {msg} [{bar:40.green/dim}] {pos}/{len} packages (eta {eta})",
    )
    .unwrap()
    .progress_chars("=> ");
    let spinner_style = ProgressStyle::with_template("{spinner:.green} {msg}").unwrap();

    let bar = ProgressBar::new(0);
    bar.set_style(spinner_style.clone());
    bar.set_message(format!("Collecting articles under {}...", config.data_dir.display()));
    bar.enable_steady_tick(Duration::from_millis(120));

    let result = citectx_index::build_index(
        &config.index_path,
        &config.data_dir,
        options,
        |event| match event {
            BuildProgress::Collecting { articles_found } => {
                bar.set_message(format!("Found {} articles", HumanCount(articles_found)));
            }
            BuildProgress::PackageComplete {
                packages_done,
                packages_total,
                records_indexed,
                ..
            } => {
                if bar.length() == Some(0) {
                    bar.set_length(packages_total);
                    bar.set_style(bar_style.clone());
                }
                bar.set_position(packages_done);
                bar.set_message(format!("{} references", HumanCount(records_indexed)));
            }
            BuildProgress::ArticleSkipped { file, error } => {
                bar.suspend(|| eprintln!("Skipped {file}: {error}"));
            }
            BuildProgress::Committing { .. } => {
                bar.set_style(spinner_style.clone());
                bar.set_message("Merging index segments...");
            }
            BuildProgress::Complete {
                articles,
                records,
                already_indexed,
                failed_files,
            } => {
                bar.finish_with_message(format!(
                    "Indexed {} references from {} articles ({} already indexed, {} failed) in {:.0?}",
                    HumanCount(records),
                    HumanCount(articles),
                    HumanCount(already_indexed),
                    failed_files.len(),
                    bar.elapsed()
                ));
            }
        },
    )
    .await;
    let added = match result {
        Err(IndexError::Cancelled { records_indexed }) => {
            bar.abandon_with_message("Interrupted");
            anyhow::bail!(
                "Interrupted after indexing {} references; rerun the same command to continue",
                records_indexed
            );
        }
        other => other?,
    };

    let index = ReferenceIndex::open(&config.index_path)?;
    let info = index.info()?;
    let canonical =
        std::fs::canonicalize(&config.index_path).unwrap_or_else(|_| config.index_path.clone());
    println!(
        "Added {} references; index at {} holds {} references from {} articles",
        added,
        canonical.display(),
        index.record_count(),
        info.articles
    );
    Ok(())
}

async fn most_cited(config: &Config, n: usize, color: ColorMode) -> anyhow::Result<()> {
    let index = Arc::new(open_index(&config.index_path)?);
    let buckets = tokio::task::spawn_blocking(move || index.most_cited(n)).await??;
    let mut stdout = std::io::stdout();
    output::print_most_cited(&mut stdout, &buckets, color)?;
    Ok(())
}

async fn resolve(config: &Config, title: &str, color: ColorMode) -> anyhow::Result<()> {
    let oracle = OfflineIndex::new(open_index(&config.index_path)?);
    let cancel = cancel_on_ctrl_c();
    let class = Resolver::new(&oracle, config.max_buckets)
        .resolve_with_cancel([title], &cancel)
        .await?;
    let mut stdout = std::io::stdout();
    output::print_equivalence_class(&mut stdout, &class, color)?;
    Ok(())
}

async fn contexts(
    config: &Config,
    title: &str,
    json: bool,
    color: ColorMode,
) -> anyhow::Result<()> {
    let oracle = OfflineIndex::new(open_index(&config.index_path)?);
    let collaborators = Collaborators {
        oracle: Arc::new(oracle),
        store: Arc::new(DirStore::new(&config.data_dir)),
        splitter: Arc::new(RuleSplitter),
    };

    let progress_writer = Arc::new(Mutex::new(std::io::stderr()));
    let progress_cb = {
        let pw = Arc::clone(&progress_writer);
        move |event: citectx_core::ProgressEvent| {
            if let Ok(mut w) = pw.lock() {
                let _ = output::print_progress(&mut *w, &event, color);
                let _ = w.flush();
            }
        }
    };

    let cancel = cancel_on_ctrl_c();
    let report =
        citectx_core::inspect_title(title, config, &collaborators, progress_cb, cancel).await?;

    let mut stdout = std::io::stdout();
    if json {
        serde_json::to_writer_pretty(&mut stdout, &report)?;
        writeln!(stdout)?;
    } else {
        output::print_report(&mut stdout, &report, color)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use citectx_core::config_file::{ConcurrencyConfig, IndexConfig};
    use std::collections::HashMap;

    fn file() -> ConfigFile {
        ConfigFile {
            index: Some(IndexConfig {
                path: Some("/from/file/index".into()),
                data_dir: Some("/from/file/data".into()),
            }),
            concurrency: Some(ConcurrencyConfig {
                num_workers: Some(8),
            }),
            ..ConfigFile::default()
        }
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = layer_config(ConfigFile::default(), env(&[]), Overrides::default());
        assert_eq!(config.index_path, PathBuf::from("citectx_index"));
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.num_workers, 4);
    }

    #[test]
    fn config_file_overrides_defaults() {
        let config = layer_config(file(), env(&[]), Overrides::default());
        assert_eq!(config.index_path, PathBuf::from("/from/file/index"));
        assert_eq!(config.data_dir, PathBuf::from("/from/file/data"));
        assert_eq!(config.num_workers, 8);
    }

    #[test]
    fn env_overrides_config_file() {
        let config = layer_config(
            file(),
            env(&[
                ("CITECTX_INDEX", "/from/env/index"),
                ("CITECTX_DATA_DIR", "/from/env/data"),
                ("CITECTX_WORKERS", "3"),
            ]),
            Overrides::default(),
        );
        assert_eq!(config.index_path, PathBuf::from("/from/env/index"));
        assert_eq!(config.data_dir, PathBuf::from("/from/env/data"));
        assert_eq!(config.num_workers, 3);
    }

    #[test]
    fn flags_override_env() {
        let config = layer_config(
            file(),
            env(&[
                ("CITECTX_INDEX", "/from/env/index"),
                ("CITECTX_WORKERS", "3"),
            ]),
            Overrides {
                index: Some("/from/flag/index".into()),
                data_dir: None,
                workers: Some(2),
            },
        );
        assert_eq!(config.index_path, PathBuf::from("/from/flag/index"));
        assert_eq!(config.data_dir, PathBuf::from("/from/file/data"));
        assert_eq!(config.num_workers, 2);
    }

    #[test]
    fn unparseable_worker_count_falls_through() {
        let config = layer_config(
            file(),
            env(&[("CITECTX_WORKERS", "many")]),
            Overrides::default(),
        );
        assert_eq!(config.num_workers, 8);
    }
}
