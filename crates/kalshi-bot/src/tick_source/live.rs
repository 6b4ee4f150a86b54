//! Live tick source polling the exchange markets feed.
//!
//! A background task polls each configured series on an interval and sends
//! complete batches over a channel; the engine consumes them at its own
//! pace. Inter-batch spacing is whatever the network gives us — consumers
//! must not assume regularity. Transient fetch failures retry with backoff;
//! only a sustained outage surfaces a terminal error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use kalshi_common::MarketStatus;

use crate::exchange::{ApiMarket, Backoff, ExchangeClient};
use crate::types::MarketSnapshot;

use super::{TickBatch, TickSource, TickSourceError};

fn market_to_snapshot(market: ApiMarket, timestamp: DateTime<Utc>) -> MarketSnapshot {
    let status = market
        .status
        .parse::<MarketStatus>()
        .unwrap_or(MarketStatus::Open);
    MarketSnapshot {
        ticker: market.ticker,
        timestamp,
        yes_bid: market.yes_bid.filter(|p| *p > 0),
        yes_ask: market.yes_ask.filter(|p| *p > 0),
        no_bid: market.no_bid.filter(|p| *p > 0),
        no_ask: market.no_ask.filter(|p| *p > 0),
        last_price: market.last_price.filter(|p| *p > 0),
        volume: market.volume,
        status,
    }
}

/// Live polling tick source.
pub struct LiveTickSource {
    receiver: mpsc::Receiver<Result<TickBatch, TickSourceError>>,
    current_time: Option<DateTime<Utc>>,
    shutdown_tx: watch::Sender<bool>,
    poll_task: Option<JoinHandle<()>>,
}

impl LiveTickSource {
    /// Start polling `series` every `poll_interval`. After
    /// `max_consecutive_failures` failed polls in a row the source yields a
    /// terminal error and stops.
    pub fn new(
        client: Arc<ExchangeClient>,
        series: Vec<String>,
        poll_interval: Duration,
        max_consecutive_failures: u32,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poll_task = tokio::spawn(Self::poll_loop(
            client,
            series,
            poll_interval,
            max_consecutive_failures,
            sender,
            shutdown_rx,
        ));
        Self {
            receiver,
            current_time: None,
            shutdown_tx,
            poll_task: Some(poll_task),
        }
    }

    async fn poll_loop(
        client: Arc<ExchangeClient>,
        series: Vec<String>,
        poll_interval: Duration,
        max_consecutive_failures: u32,
        sender: mpsc::Sender<Result<TickBatch, TickSourceError>>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(poll_interval);
        let mut backoff = Backoff::default();
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_rx.changed() => {
                    info!("live tick source shutting down");
                    return;
                }
            }

            let mut markets = Vec::new();
            let mut poll_failed = false;
            for s in &series {
                match client.markets(s).await {
                    Ok(batch) => markets.extend(batch),
                    Err(e) => {
                        warn!(series = %s, error = %e, "market poll failed");
                        poll_failed = true;
                        break;
                    }
                }
            }

            if poll_failed {
                consecutive_failures += 1;
                if consecutive_failures > max_consecutive_failures {
                    let _ = sender
                        .send(Err(TickSourceError::FeedExhausted {
                            attempts: consecutive_failures,
                            message: "sustained market feed failure".to_string(),
                        }))
                        .await;
                    return;
                }
                // Back off before the next attempt on top of the interval.
                tokio::time::sleep(backoff.next_delay()).await;
                continue;
            }
            consecutive_failures = 0;
            backoff.reset();

            if markets.is_empty() {
                continue;
            }

            // One batch per poll; all snapshots share the poll instant.
            let now = Utc::now();
            let mut snapshots: Vec<MarketSnapshot> = markets
                .into_iter()
                .map(|m| market_to_snapshot(m, now))
                .collect();
            snapshots.sort_by(|a, b| a.ticker.cmp(&b.ticker));

            if sender
                .send(Ok(TickBatch::new(now, snapshots)))
                .await
                .is_err()
            {
                // Engine dropped the receiver; nothing left to feed.
                return;
            }
        }
    }
}

#[async_trait]
impl TickSource for LiveTickSource {
    async fn next_batch(&mut self) -> Result<Option<TickBatch>, TickSourceError> {
        match self.receiver.recv().await {
            Some(Ok(batch)) => {
                self.current_time = Some(batch.timestamp);
                Ok(Some(batch))
            }
            Some(Err(e)) => Err(e),
            // Poll task ended (shutdown): the stream is over.
            None => Ok(None),
        }
    }

    fn current_time(&self) -> Option<DateTime<Utc>> {
        self.current_time
    }

    async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.poll_task.take() {
            let _ = task.await;
        }
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_to_snapshot_zero_prices_are_absent() {
        let market = ApiMarket {
            ticker: "KXHIGHNY-26JAN09-B49.5".to_string(),
            status: "open".to_string(),
            yes_bid: Some(0),
            yes_ask: Some(45),
            no_bid: Some(53),
            no_ask: Some(0),
            last_price: None,
            volume: 12,
        };
        let snap = market_to_snapshot(market, Utc::now());
        // The API reports 0 for "no quote"; the engine models that as None.
        assert_eq!(snap.yes_bid, None);
        assert_eq!(snap.yes_ask, Some(45));
        assert_eq!(snap.no_ask, None);
        assert_eq!(snap.volume, 12);
    }

    #[test]
    fn test_unknown_status_defaults_open() {
        let market = ApiMarket {
            ticker: "T".to_string(),
            status: "weird".to_string(),
            yes_bid: None,
            yes_ask: None,
            no_bid: None,
            no_ask: None,
            last_price: None,
            volume: 0,
        };
        let snap = market_to_snapshot(market, Utc::now());
        assert_eq!(snap.status, MarketStatus::Open);
    }
}
