/*!
KVS CLI - command-line harness for the key-value store snapshot engine.

Opens one store instance per invocation, runs a single command against it and
exits. Commands that change the live state flush it on exit unless
`--no-flush-on-exit` is given.
*/

use anyhow::Context;
use clap::{Parser, Subcommand};
use kvs_core::{Kvs, KvsConfig, KvsError, KvsValue, SnapshotEntry, SnapshotId};
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "kvs")]
#[command(about = "Inspect and drive a key-value store instance and its snapshots")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding the store files
    #[arg(short, long, global = true, env = "KVS_DIR", default_value = ".")]
    dir: PathBuf,

    /// Store instance identifier
    #[arg(short, long, global = true, default_value_t = 0)]
    instance_id: u64,

    /// Number of snapshots to retain
    #[arg(long, global = true, default_value_t = kvs_core::DEFAULT_SNAPSHOT_MAX_COUNT)]
    snapshot_max_count: usize,

    /// Do not flush when the store is closed
    #[arg(long, global = true)]
    no_flush_on_exit: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set a key; the value is parsed as JSON, falling back to a plain string
    Set { key: String, value: String },
    /// Print the value of a key
    Get { key: String },
    /// Remove a key
    Remove { key: String },
    /// Flush the current state and rotate snapshots
    Flush,
    /// Print the number of retained snapshots
    Count,
    /// Print the configured snapshot limit
    MaxCount,
    /// Replace the current state with a snapshot
    Restore { snapshot_id: u64 },
    /// Print the file paths of a snapshot
    Paths { snapshot_id: u64 },
    /// Verify the integrity of a snapshot
    Verify { snapshot_id: u64 },
    /// List retained snapshots
    List,
}

impl Commands {
    /// Commands whose effect is lost unless the store is flushed afterwards.
    fn mutates(&self) -> bool {
        matches!(
            self,
            Commands::Set { .. } | Commands::Remove { .. } | Commands::Restore { .. }
        )
    }
}

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Modified")]
    modified: String,
    #[tabled(rename = "Hash")]
    hash: String,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json);
    run(cli)
}

fn init_logging(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "debug"
    } else {
        kvs_core::observability::DEFAULT_FILTER
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn config_for(cli: &Cli) -> KvsConfig {
    KvsConfig::new(cli.instance_id, &cli.dir)
        .with_snapshot_max_count(cli.snapshot_max_count)
        .with_flush_on_exit(!cli.no_flush_on_exit && cli.command.mutates())
}

fn run(cli: Cli) -> Result<(), anyhow::Error> {
    let config = config_for(&cli);
    let kvs = Kvs::open(config)
        .with_context(|| format!("failed to open store in {}", cli.dir.display()))?;

    match cli.command {
        Commands::Set { key, value } => {
            kvs.set_value(key.as_str(), parse_value(&value))?;
            info!(key = %key, "value set");
        }
        Commands::Get { key } => {
            let value = kvs.get_value(&key)?;
            println!("{}", serde_json::to_string_pretty(&value.to_json())?);
        }
        Commands::Remove { key } => kvs.remove_key(&key)?,
        Commands::Flush => {
            kvs.flush()?;
            println!("snapshot_count: {}", kvs.snapshot_count()?);
        }
        Commands::Count => println!("{}", kvs.snapshot_count()?),
        Commands::MaxCount => println!("{}", kvs.snapshot_max_count()?),
        Commands::Restore { snapshot_id } => {
            if let Err(e) = kvs.snapshot_restore(SnapshotId(snapshot_id)) {
                error!(snapshot_id, error = %e, "restore failed");
                return Err(e.into());
            }
            println!("✓ Restored snapshot {snapshot_id}");
        }
        Commands::Paths { snapshot_id } => {
            let paths = kvs.snapshot_paths(SnapshotId(snapshot_id));
            println!("kvs_path: {}", paths.data.display());
            println!("kvs_path_exists: {}", paths.data_exists());
            println!("hash_path: {}", paths.hash.display());
            println!("hash_path_exists: {}", paths.hash_exists());
        }
        Commands::Verify { snapshot_id } => match kvs.snapshot_verify(SnapshotId(snapshot_id)) {
            Ok(digest) => {
                println!("✓ Snapshot {snapshot_id} is valid");
                println!("  SHA-256: {digest}");
            }
            Err(KvsError::Corruption {
                expected, actual, ..
            }) => {
                error!("✗ Integrity check failed:");
                error!("  Expected hash: {}", expected);
                error!("  Actual hash: {}", actual);
                return Err(anyhow::anyhow!("Integrity check failed"));
            }
            Err(e) => {
                error!("✗ Failed to verify snapshot: {}", e);
                return Err(e.into());
            }
        },
        Commands::List => {
            let rows: Vec<SnapshotRow> = kvs.snapshot_list()?.iter().map(snapshot_row).collect();
            if rows.is_empty() {
                println!("No snapshots found");
            } else {
                println!("{}", Table::new(rows));
            }
        }
    }

    Ok(())
}

/// Parse a command-line value as JSON; anything that is not JSON is a string.
fn parse_value(raw: &str) -> KvsValue {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => KvsValue::from_json(json),
        Err(_) => KvsValue::from(raw),
    }
}

fn snapshot_row(entry: &SnapshotEntry) -> SnapshotRow {
    let metadata = std::fs::metadata(&entry.paths.data).ok();
    SnapshotRow {
        id: entry.id.0,
        file: file_name(&entry.paths.data),
        size: metadata
            .as_ref()
            .map(|m| format_size(m.len()))
            .unwrap_or_else(|| "Unknown".to_string()),
        modified: metadata
            .and_then(|m| m.modified().ok())
            .map(format_modified)
            .unwrap_or_else(|| "Unknown".to_string()),
        hash: if entry.paths.hash_exists() {
            "present".to_string()
        } else {
            "missing".to_string()
        },
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_modified(time: std::time::SystemTime) -> String {
    let local: chrono::DateTime<chrono::Local> = time.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}
