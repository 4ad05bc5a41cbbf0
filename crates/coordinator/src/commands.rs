//! Implementations of the `igloo-coordinator` subcommands.
//!
//! Each command returns the JSON it would print, so the binary stays a thin
//! shell around these functions.

use crate::config::Settings;
use crate::dump::QueryDump;
use crate::error::{CoordinatorError, Result};
use crate::reporter::ProgressReporter;
use crate::tracker::QueryTracker;
use chrono::Utc;
use igloo_stats::QueryStats;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Aggregates a single query dump.
pub fn aggregate(input: &Path, pretty: bool) -> Result<String> {
    let dump: QueryDump = serde_json::from_str(&std::fs::read_to_string(input)?)?;
    debug!(query_id = %dump.query_id, stages = dump.stages.len(), "aggregating dump");
    let stats = dump.aggregate(Utc::now())?;
    to_json(&stats, pretty)
}

/// Parses a snapshot through the validating constructor and re-serializes it.
pub fn validate(input: &Path, pretty: bool) -> Result<String> {
    let stats: QueryStats = serde_json::from_str(&std::fs::read_to_string(input)?)?;
    to_json(&stats, pretty)
}

/// Feeds a sequence of dumps, one JSON document per line, into a live
/// tracker while the progress reporter polls it. Returns the final snapshot.
pub async fn replay(
    input: &Path,
    settings: &Settings,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<String> {
    let contents = tokio::fs::read_to_string(input).await?;
    let dumps = contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str::<QueryDump>)
        .collect::<Result<Vec<_>, _>>()?;
    let first = dumps.first().ok_or_else(|| {
        CoordinatorError::Internal(format!("no query dumps in {}", input.display()))
    })?;

    let tracker = Arc::new(QueryTracker::new(first.query_id.clone(), first.create_time));
    info!(query_id = %tracker.query_id(), updates = dumps.len(), "replaying query");
    let reporter = ProgressReporter::spawn(
        Arc::clone(&tracker),
        settings.poll_interval(),
        shutdown_rx.clone(),
    );

    for dump in &dumps {
        if *shutdown_rx.borrow() {
            break;
        }
        dump.apply_to(&tracker)?;
        tokio::time::sleep(settings.poll_interval()).await;
    }
    if !tracker.is_done() {
        tracker.finish(Utc::now());
    }

    let stats = match reporter.join().await? {
        Some(stats) => stats,
        None => Arc::new(tracker.snapshot(Utc::now())?),
    };
    to_json(&stats, settings.pretty_json)
}

fn to_json(stats: &QueryStats, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(stats)?
    } else {
        serde_json::to_string(stats)?
    };
    Ok(json)
}
