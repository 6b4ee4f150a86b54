//! Tick source abstraction over historical replay and live polling.
//!
//! A tick source produces a lazy, ordered sequence of snapshot batches —
//! one batch per timestamp, one snapshot per ticker — with strictly
//! non-decreasing timestamps. Where the data came from is invisible to the
//! engine: a replayed log and a live feed drive the exact same loop.

pub mod historical;
pub mod live;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::MarketSnapshot;

pub use historical::HistoricalTickSource;
pub use live::LiveTickSource;

/// Errors from tick sources.
#[derive(Debug, Error)]
pub enum TickSourceError {
    #[error("failed to read tick data: {0}")]
    Io(#[from] std::io::Error),

    #[error("feed unavailable after {attempts} attempts: {message}")]
    FeedExhausted { attempts: u32, message: String },

    #[error("tick source shut down")]
    Shutdown,
}

/// All snapshots sharing one timestamp.
#[derive(Debug, Clone)]
pub struct TickBatch {
    pub timestamp: DateTime<Utc>,
    pub snapshots: Vec<MarketSnapshot>,
}

impl TickBatch {
    pub fn new(timestamp: DateTime<Utc>, snapshots: Vec<MarketSnapshot>) -> Self {
        Self {
            timestamp,
            snapshots,
        }
    }
}

/// Source of ordered snapshot batches.
///
/// `next_batch` returns `None` when the source is exhausted (historical
/// replay completed); live sources are unbounded and only end via
/// `shutdown` or a terminal feed error. Consumers must tolerate irregular
/// gaps between batches — live feeds guarantee order, never spacing.
#[async_trait]
pub trait TickSource: Send {
    /// Next batch, or `None` at end of stream.
    async fn next_batch(&mut self) -> Result<Option<TickBatch>, TickSourceError>;

    /// Timestamp of the most recently yielded batch.
    fn current_time(&self) -> Option<DateTime<Utc>>;

    /// Stop producing; pending resources are released.
    async fn shutdown(&mut self);
}
