use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use blamemux_ingest::{detect, resolve_target, GitImporter, Registry};
use blamemux_store::SqliteStore;
use blamemux_types::{BlameConfig, Importer, Store};

#[derive(Parser)]
#[command(name = "blamemux", about = "Per-author line ownership across repository history")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Default)]
struct Tuning {
    /// Worker threads running blame commands
    #[arg(long)]
    workers: Option<usize>,
    /// Jobs submitted between two database writes
    #[arg(long)]
    watermark: Option<usize>,
    #[arg(long = "queue-size")]
    queue_size: Option<usize>,
    /// Per-file blame timeout in seconds; 0 disables it
    #[arg(long = "timeout-secs")]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    Init {
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Import or extend the git history of a working copy
    Ingest {
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Run analysis stages (and their dependencies) over an imported repository
    Run {
        path: PathBuf,
        #[arg(long = "ext", default_value = "Blame")]
        ext: Vec<String>,
        #[arg(long)]
        db: Option<PathBuf>,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Remove everything the named stages stored for a repository
    Backout {
        path: PathBuf,
        #[arg(long = "ext", default_value = "Blame")]
        ext: Vec<String>,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    Status {
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Per-author line counts of a file at its latest blamed commit
    Owners {
        path: PathBuf,
        file: String,
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

fn resolve_db_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(p) = flag {
        return p;
    }
    if let Ok(v) = std::env::var("BLAMEMUX_DB") {
        return PathBuf::from(v);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".blamemux").join("db.sqlite3")
}

fn open_store(db: Option<PathBuf>) -> Result<SqliteStore> {
    let db_path = resolve_db_path(db);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))
}

fn blame_config(tuning: &Tuning) -> BlameConfig {
    let mut config = BlameConfig::default();
    if let Some(workers) = tuning.workers {
        config.workers = workers;
    }
    if let Some(watermark) = tuning.watermark {
        config.watermark = watermark;
    }
    if let Some(queue_size) = tuning.queue_size {
        config.queue_size = queue_size;
    }
    if let Some(secs) = tuning.timeout_secs {
        config.job_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    config
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db } => {
            let db_path = resolve_db_path(db.clone());
            open_store(db)?;
            println!("Initialized blamemux database at {}", db_path.display());
        }

        Commands::Ingest { path, name, db } => {
            let store = open_store(db)?;
            let summary = GitImporter::new()
                .import(&path, name.as_deref(), &store)
                .with_context(|| format!("Failed to import history of {}", path.display()))?;
            println!(
                "Ingested '{}'... {} commits imported, {} already present",
                summary.repo_uri, summary.commits_imported, summary.commits_already_present
            );
            for err in &summary.errors {
                eprintln!("  warning: {}", err);
            }
        }

        Commands::Run { path, ext, db, tuning } => {
            let store = open_store(db)?;
            let config = blame_config(&tuning);
            config.validate().context("Invalid blame configuration")?;
            let repo = detect(&path)
                .with_context(|| format!("Failed to open repository at {}", path.display()))?;

            let registry = Registry::with_defaults(config);
            let names: Vec<&str> = ext.iter().map(String::as_str).collect();
            let stages = registry.resolve(&names).context("Failed to resolve stages")?;
            for stage in stages {
                let report = stage
                    .run(Arc::clone(&repo), &path_arg(&path), &store)
                    .with_context(|| format!("Stage '{}' failed", stage.name()))?;
                let json = serde_json::to_string_pretty(&report)
                    .context("Failed to serialize stage report to JSON")?;
                println!("{}", json);
            }
        }

        Commands::Backout { path, ext, db } => {
            let store = open_store(db)?;
            let repo = detect(&path)
                .with_context(|| format!("Failed to open repository at {}", path.display()))?;

            let registry = Registry::with_defaults(BlameConfig::default());
            let names: Vec<&str> = ext.iter().map(String::as_str).collect();
            let stages = registry.backout_order(&names).context("Failed to resolve stages")?;
            for stage in stages {
                let removed = stage
                    .backout(Arc::clone(&repo), &path_arg(&path), &store)
                    .with_context(|| format!("Backout of '{}' failed", stage.name()))?;
                println!("Backed out '{}': {} rows removed", stage.name(), removed);
            }
        }

        Commands::Status { db } => {
            let store = open_store(db)?;
            let repos = store.list_repositories().context("Failed to list repositories")?;

            println!("{:<20} {:<5} {:>8} {:>10} {:>10}", "REPO", "TYPE", "COMMITS", "CLASSIFIED", "BLAME");
            for r in &repos {
                match store
                    .repo_stats(r.id)
                    .with_context(|| format!("Failed to get stats for '{}'", r.name))
                {
                    Ok(stats) => {
                        println!(
                            "{:<20} {:<5} {:>8} {:>10} {:>10}",
                            r.name, stats.kind, stats.commit_count, stats.classified_files, stats.blame_rows
                        );
                    }
                    Err(e) => {
                        eprintln!("Error fetching stats for '{}': {:#}", r.name, e);
                    }
                }
            }
        }

        Commands::Owners { path, file, db } => {
            let store = open_store(db)?;
            let repo = detect(&path)
                .with_context(|| format!("Failed to open repository at {}", path.display()))?;
            let target = resolve_target(repo.as_ref(), &path_arg(&path), &store)
                .context("Failed to resolve repository")?;

            let wanted = file.trim_matches('/');
            let file_id = store
                .current_paths(target.repository_id)
                .context("Failed to list repository files")?
                .into_iter()
                .find(|(p, _)| p == wanted)
                .map(|(_, id)| id)
                .ok_or_else(|| anyhow::anyhow!("File '{}' not found in {}", file, target.repo_uri))?;

            match store.owners(file_id).context("Failed to get owners")? {
                None => {
                    eprintln!("No blame data for '{}'", file);
                    std::process::exit(1);
                }
                Some(ownership) => {
                    let json = serde_json::to_string_pretty(&ownership)
                        .context("Failed to serialize owners to JSON")?;
                    println!("{}", json);
                }
            }
        }
    }

    Ok(())
}
