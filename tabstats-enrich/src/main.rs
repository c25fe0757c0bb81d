//! TabStats enrichment replay tool
//!
//! Replays recorded presence ticks through an enrichment session backed by
//! the real profile and report services, then prints the resulting cache as
//! JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tabstats_common::config::{default_config_path, load_toml_config, TomlConfig};
use tabstats_common::logging::init_logging;
use tabstats_enrich::{Candidate, EnrichedRecord, Session};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Command-line arguments for tabstats-enrich
#[derive(Parser, Debug)]
#[command(name = "tabstats-enrich")]
#[command(about = "Replay presence ticks through the TabStats enrichment pipeline")]
#[command(version)]
struct Args {
    /// Config file (defaults to <config dir>/tabstats/config.toml)
    #[arg(short, long, env = "TABSTATS_CONFIG")]
    config: Option<PathBuf>,

    /// JSON-lines file; each line is one tick: an array of {id, name, display_label}
    #[arg(short, long)]
    replay: PathBuf,

    /// Delay between replayed ticks
    #[arg(long, default_value = "50")]
    tick_ms: u64,

    /// Maximum time to wait for in-flight fetches after the last tick
    #[arg(long, default_value = "10000")]
    settle_ms: u64,

    /// Also resolve report tags for every cached player
    #[arg(long)]
    reports: bool,
}

#[derive(Serialize)]
struct SnapshotEntry<'a> {
    #[serde(flatten)]
    record: &'a EnrichedRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    report_tag: Option<&'static str>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    init_logging(&config.logging).context("Failed to initialize logging")?;

    let ticks = read_replay(&args.replay)?;
    info!(
        ticks = ticks.len(),
        replay = %args.replay.display(),
        "Loaded replay"
    );

    let session = Session::from_config(&config).context("Failed to build enrichment session")?;
    session.start();

    for tick in &ticks {
        let summary = session.on_tick(tick);
        tracing::debug!(?summary, "Tick processed");
        tokio::time::sleep(Duration::from_millis(args.tick_ms)).await;
    }

    if tokio::time::timeout(Duration::from_millis(args.settle_ms), session.wait_idle())
        .await
        .is_err()
    {
        warn!(settle_ms = args.settle_ms, "Fetches still in flight after settle period");
    }

    let records = session.world().snapshot();
    let mut report_tags = vec![None; records.len()];
    if args.reports {
        // All lookups start together so they share the batching window
        let mut lookups = JoinSet::new();
        for (index, record) in records.iter().enumerate() {
            let reports = Arc::clone(session.reports());
            let name = record.display_name().to_string();
            lookups.spawn(async move { (index, reports.lookup(&name).await) });
        }
        while let Some(joined) = lookups.join_next().await {
            let (index, tag) = joined.context("Report lookup task failed")?;
            report_tags[index] = tag.map(|tag| tag.display());
        }
    }

    let entries: Vec<SnapshotEntry<'_>> = records
        .iter()
        .zip(report_tags)
        .map(|(record, report_tag)| SnapshotEntry {
            record: record.as_ref(),
            report_tag,
        })
        .collect();

    let output = serde_json::to_string_pretty(&entries).context("Failed to serialize snapshot")?;
    println!("{}", output);

    session.end();
    Ok(())
}

fn load_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path(),
    };
    match path {
        Some(path) => load_toml_config(&path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(TomlConfig::default()),
    }
}

fn read_replay(path: &Path) -> Result<Vec<Vec<Candidate>>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay file {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid tick on line {}", index + 1))
        })
        .collect()
}
