//! Historical tick replay from captured market logs.
//!
//! Reads every `market_data_*.csv` under a directory, sorts rows by
//! (timestamp, file order, row order) so replays are stable even when the
//! collector wrote overlapping files, and yields one batch per distinct
//! timestamp. Malformed rows are skipped with a warning — a half-written
//! line in a log must never kill a backtest.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use kalshi_common::MarketStatus;

use crate::types::MarketSnapshot;

use super::{TickBatch, TickSource, TickSourceError};

/// Row shape written by the market-data collector.
///
/// Prices come through as strings because the collector leaves the field
/// empty when a side has no quotes.
#[derive(Debug, Deserialize)]
struct LogRow {
    timestamp: String,
    #[serde(alias = "market_ticker")]
    ticker: String,
    #[serde(default, alias = "best_yes_bid")]
    yes_bid: Option<String>,
    #[serde(default, alias = "implied_yes_ask")]
    yes_ask: Option<String>,
    #[serde(default, alias = "best_no_bid")]
    no_bid: Option<String>,
    #[serde(default, alias = "implied_no_ask")]
    no_ask: Option<String>,
    #[serde(default)]
    last_price: Option<String>,
    #[serde(default)]
    volume: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

fn parse_price(field: &Option<String>) -> Option<u32> {
    let raw = field.as_deref()?.trim();
    if raw.is_empty() {
        return None;
    }
    // Collector logs occasionally carry prices as floats ("45.0").
    raw.parse::<u32>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().map(|f| f as u32))
        .filter(|p| *p <= 100)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // Collector files use naive "YYYY-mm-dd HH:MM:SS[.fff]" in UTC.
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, format) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    None
}

/// Replays captured market logs in timestamp order.
pub struct HistoricalTickSource {
    /// Batches in chronological order, reversed for O(1) pop.
    batches: Vec<TickBatch>,
    current_time: Option<DateTime<Utc>>,
}

impl HistoricalTickSource {
    /// Load every `market_data_*.csv` under `dir`, optionally windowed to
    /// `[start, end]`.
    pub fn from_dir(
        dir: impl AsRef<Path>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self, TickSourceError> {
        let dir = dir.as_ref();
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("market_data_") && n.ends_with(".csv"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        // (time, file order, row order, snapshot) for a stable global sort.
        let mut rows: Vec<(DateTime<Utc>, usize, usize, MarketSnapshot)> = Vec::new();
        for (file_index, path) in files.iter().enumerate() {
            let mut reader = match csv::Reader::from_path(path) {
                Ok(reader) => reader,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable log file");
                    continue;
                }
            };
            let mut row_count = 0usize;
            let mut skipped = 0usize;
            for (row_index, record) in reader.deserialize::<LogRow>().enumerate() {
                row_count += 1;
                let row = match record {
                    Ok(row) => row,
                    Err(e) => {
                        skipped += 1;
                        debug!(file = %path.display(), row = row_index, error = %e, "malformed row skipped");
                        continue;
                    }
                };
                let Some(snapshot) = Self::row_to_snapshot(row) else {
                    skipped += 1;
                    continue;
                };
                if let Some(start) = start {
                    if snapshot.timestamp < start {
                        continue;
                    }
                }
                if let Some(end) = end {
                    if snapshot.timestamp > end {
                        continue;
                    }
                }
                rows.push((snapshot.timestamp, file_index, row_index, snapshot));
            }
            if skipped > 0 {
                warn!(file = %path.display(), skipped, total = row_count, "skipped malformed rows");
            }
        }

        rows.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));

        // Group equal timestamps into batches.
        let mut batches: Vec<TickBatch> = Vec::new();
        for (ts, _, _, snapshot) in rows {
            match batches.last_mut() {
                Some(batch) if batch.timestamp == ts => batch.snapshots.push(snapshot),
                _ => batches.push(TickBatch::new(ts, vec![snapshot])),
            }
        }

        info!(
            files = files.len(),
            batches = batches.len(),
            "loaded historical ticks"
        );

        batches.reverse();
        Ok(Self {
            batches,
            current_time: None,
        })
    }

    /// Build a source from pre-constructed batches (tests, sweeps).
    pub fn from_batches(mut batches: Vec<TickBatch>) -> Self {
        batches.reverse();
        Self {
            batches,
            current_time: None,
        }
    }

    fn row_to_snapshot(row: LogRow) -> Option<MarketSnapshot> {
        let timestamp = parse_timestamp(row.timestamp.trim())?;
        if row.ticker.trim().is_empty() {
            return None;
        }
        let status = row
            .status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<MarketStatus>())
            .transpose()
            .ok()?
            .unwrap_or_default();
        Some(MarketSnapshot {
            ticker: row.ticker.trim().to_string(),
            timestamp,
            yes_bid: parse_price(&row.yes_bid),
            yes_ask: parse_price(&row.yes_ask),
            no_bid: parse_price(&row.no_bid),
            no_ask: parse_price(&row.no_ask),
            last_price: parse_price(&row.last_price),
            volume: row
                .volume
                .as_deref()
                .and_then(|v| v.trim().parse::<f64>().ok())
                .map(|v| v as u64)
                .unwrap_or(0),
            status,
        })
    }

    pub fn remaining_batches(&self) -> usize {
        self.batches.len()
    }
}

#[async_trait]
impl TickSource for HistoricalTickSource {
    async fn next_batch(&mut self) -> Result<Option<TickBatch>, TickSourceError> {
        let batch = self.batches.pop();
        if let Some(batch) = &batch {
            self.current_time = Some(batch.timestamp);
        }
        Ok(batch)
    }

    fn current_time(&self) -> Option<DateTime<Utc>> {
        self.current_time
    }

    async fn shutdown(&mut self) {
        self.batches.clear();
    }
}
