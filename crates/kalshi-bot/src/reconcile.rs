//! Desired-vs-live order reconciliation.
//!
//! Given the strategy's desired quote set and the adapter's latest view of
//! resting orders, compute the minimal action set that converges live state
//! onto desired state. The logic is identical for live and simulated
//! execution — only the adapter that carries the actions out differs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use kalshi_common::Side;

use crate::types::{LiveOrder, OrderIntent};

/// Why a cancel was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// No desired intent matches this order.
    Unwanted,
    /// The order outlived the configured maximum age.
    Expired,
    /// A second order was resting on the same side of the same ticker.
    Duplicate,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::Unwanted => "unwanted",
            CancelReason::Expired => "expired",
            CancelReason::Duplicate => "duplicate",
        }
    }
}

/// One step of convergence from live state to desired state.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    /// Rest a new order.
    Place { intent: OrderIntent },
    /// Move an existing order to the intent's price/quantity. Whether this
    /// is an in-place amend or a cancel+replace is the adapter's business.
    Amend {
        order_id: String,
        intent: OrderIntent,
    },
    /// Remove a resting order.
    Cancel {
        order_id: String,
        ticker: String,
        side: Side,
        reason: CancelReason,
    },
}

impl ReconcileAction {
    pub fn ticker(&self) -> &str {
        match self {
            ReconcileAction::Place { intent } => &intent.ticker,
            ReconcileAction::Amend { intent, .. } => &intent.ticker,
            ReconcileAction::Cancel { ticker, .. } => ticker,
        }
    }

    /// Safety actions (age/duplicate cancels) bypass the requote throttle.
    pub fn is_forced(&self) -> bool {
        matches!(
            self,
            ReconcileAction::Cancel {
                reason: CancelReason::Expired | CancelReason::Duplicate,
                ..
            }
        )
    }
}

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Minimum seconds between action batches per ticker.
    pub min_requote_interval_secs: f64,
    /// Resting orders older than this are force-canceled.
    pub max_order_age_secs: i64,
    /// Price drift (cents) tolerated before amending.
    pub price_tolerance_cents: u32,
}

/// The reconciler. Holds only pacing state; order state belongs to the
/// adapter and desired state to the strategy.
#[derive(Debug)]
pub struct Reconciler {
    config: ReconcilerConfig,
    last_action: HashMap<String, DateTime<Utc>>,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            last_action: HashMap::new(),
        }
    }

    /// Restore pacing state from a snapshot timestamp so a warm start does
    /// not immediately requote every ticker.
    pub fn seed_last_action(&mut self, ticker: &str, at: DateTime<Utc>) {
        self.last_action.insert(ticker.to_string(), at);
    }

    /// True while the ticker is inside its requote interval.
    fn throttled(&self, ticker: &str, now: DateTime<Utc>) -> bool {
        if self.config.min_requote_interval_secs <= 0.0 {
            return false;
        }
        let Some(last) = self.last_action.get(ticker) else {
            return false;
        };
        let elapsed = (now - *last).num_milliseconds() as f64 / 1000.0;
        elapsed < self.config.min_requote_interval_secs
    }

    /// Compute the action set for one ticker.
    ///
    /// `desired = None` means the strategy had no opinion this tick: only
    /// safety cancels (age, duplicates) are considered. A throttled ticker
    /// likewise emits safety cancels only; the deferred convergence is
    /// re-derived from fresh state on the next eligible tick rather than
    /// queued, so it can never act on stale prices.
    pub fn reconcile(
        &mut self,
        ticker: &str,
        desired: Option<&[OrderIntent]>,
        live: &[LiveOrder],
        now: DateTime<Utc>,
    ) -> Vec<ReconcileAction> {
        let mut actions = Vec::new();
        let mut gone: Vec<&str> = Vec::new();

        // Safety pass: duplicates first (at most one resting order per side
        // per ticker), then age expiry. These run even when throttled.
        let mut seen_side: HashMap<Side, &LiveOrder> = HashMap::new();
        for order in live {
            match seen_side.get(&order.side).copied() {
                None => {
                    seen_side.insert(order.side, order);
                }
                Some(first) => {
                    // Keep the older order, cancel the newcomer.
                    let stale = if first.placed_at <= order.placed_at {
                        order
                    } else {
                        seen_side.insert(order.side, order);
                        first
                    };
                    actions.push(ReconcileAction::Cancel {
                        order_id: stale.order_id.clone(),
                        ticker: ticker.to_string(),
                        side: stale.side,
                        reason: CancelReason::Duplicate,
                    });
                    gone.push(stale.order_id.as_str());
                }
            }
        }

        for order in live {
            if gone.contains(&order.order_id.as_str()) {
                continue;
            }
            if order.age_secs(now) > self.config.max_order_age_secs {
                actions.push(ReconcileAction::Cancel {
                    order_id: order.order_id.clone(),
                    ticker: ticker.to_string(),
                    side: order.side,
                    reason: CancelReason::Expired,
                });
                gone.push(order.order_id.as_str());
            }
        }

        let Some(desired) = desired else {
            return actions;
        };
        if self.throttled(ticker, now) {
            return actions;
        }

        // Live orders still standing after the safety pass.
        let standing: Vec<&LiveOrder> = live
            .iter()
            .filter(|o| !gone.contains(&o.order_id.as_str()))
            .collect();

        // One intent per side; later duplicates from the strategy are
        // ignored rather than racing the first.
        let mut wanted: HashMap<Side, &OrderIntent> = HashMap::new();
        for intent in desired {
            wanted.entry(intent.side).or_insert(intent);
        }

        let mut converge = Vec::new();
        for (side, intent) in [Side::Yes, Side::No]
            .iter()
            .filter_map(|s| wanted.get(s).map(|i| (*s, *i)))
        {
            match standing.iter().find(|o| o.side == side) {
                None => converge.push(ReconcileAction::Place {
                    intent: (*intent).clone(),
                }),
                Some(order) => {
                    let drift = order.price.abs_diff(intent.price);
                    if drift > self.config.price_tolerance_cents
                        || order.remaining < intent.quantity
                    {
                        converge.push(ReconcileAction::Amend {
                            order_id: order.order_id.clone(),
                            intent: (*intent).clone(),
                        });
                    }
                    // Within tolerance: leave it alone, avoid churn.
                }
            }
        }

        for order in &standing {
            if !wanted.contains_key(&order.side) {
                converge.push(ReconcileAction::Cancel {
                    order_id: order.order_id.clone(),
                    ticker: ticker.to_string(),
                    side: order.side,
                    reason: CancelReason::Unwanted,
                });
            }
        }

        if !converge.is_empty() {
            self.last_action.insert(ticker.to_string(), now);
            // Cancels before places so the per-side invariant holds at
            // every intermediate step.
            converge.sort_by_key(|a| match a {
                ReconcileAction::Cancel { .. } => 0,
                ReconcileAction::Amend { .. } => 1,
                ReconcileAction::Place { .. } => 2,
            });
            actions.extend(converge);
        }

        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn config() -> ReconcilerConfig {
        ReconcilerConfig {
            min_requote_interval_secs: 2.0,
            max_order_age_secs: 300,
            price_tolerance_cents: 0,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 9, 14, 0, 0).unwrap()
    }

    fn order(id: &str, side: Side, price: u32, qty: u32, placed_at: DateTime<Utc>) -> LiveOrder {
        LiveOrder {
            order_id: id.to_string(),
            ticker: "T".to_string(),
            side,
            price,
            remaining: qty,
            placed_at,
        }
    }

    fn intent(side: Side, price: u32, qty: u32) -> OrderIntent {
        OrderIntent::new("T", side, price, qty)
    }

    #[test]
    fn test_place_when_nothing_resting() {
        let mut r = Reconciler::new(config());
        let desired = vec![intent(Side::Yes, 45, 10)];
        let actions = r.reconcile("T", Some(&desired), &[], t0());
        assert_eq!(
            actions,
            vec![ReconcileAction::Place {
                intent: intent(Side::Yes, 45, 10)
            }]
        );
    }

    #[test]
    fn test_cancel_when_no_matching_intent() {
        let mut r = Reconciler::new(config());
        let live = vec![order("O1", Side::Yes, 45, 10, t0())];
        let actions = r.reconcile("T", Some(&[]), &live, t0());
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            ReconcileAction::Cancel {
                order_id,
                reason: CancelReason::Unwanted,
                ..
            } if order_id == "O1"
        ));
    }

    #[test]
    fn test_matching_order_within_tolerance_is_noop() {
        let mut r = Reconciler::new(ReconcilerConfig {
            price_tolerance_cents: 1,
            ..config()
        });
        let live = vec![order("O1", Side::Yes, 45, 10, t0())];
        let desired = vec![intent(Side::Yes, 46, 10)];
        let actions = r.reconcile("T", Some(&desired), &live, t0());
        assert!(actions.is_empty());
    }

    #[test]
    fn test_price_drift_beyond_tolerance_amends() {
        let mut r = Reconciler::new(config());
        let live = vec![order("O1", Side::Yes, 45, 10, t0())];
        let desired = vec![intent(Side::Yes, 47, 10)];
        let actions = r.reconcile("T", Some(&desired), &live, t0());
        assert_eq!(
            actions,
            vec![ReconcileAction::Amend {
                order_id: "O1".to_string(),
                intent: intent(Side::Yes, 47, 10)
            }]
        );
    }

    #[test]
    fn test_none_desired_keeps_orders() {
        let mut r = Reconciler::new(config());
        let live = vec![order("O1", Side::Yes, 45, 10, t0())];
        let actions = r.reconcile("T", None, &live, t0());
        assert!(actions.is_empty());
    }

    #[test]
    fn test_duplicate_per_side_canceled_before_placement() {
        let mut r = Reconciler::new(config());
        let live = vec![
            order("O1", Side::Yes, 45, 10, t0()),
            order("O2", Side::Yes, 46, 10, t0() + Duration::seconds(1)),
        ];
        let desired = vec![intent(Side::Yes, 45, 10)];
        let actions = r.reconcile("T", Some(&desired), &live, t0() + Duration::seconds(5));

        // The newer duplicate goes; the older survivor matches the intent.
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            ReconcileAction::Cancel {
                order_id,
                reason: CancelReason::Duplicate,
                ..
            } if order_id == "O2"
        ));
    }

    #[test]
    fn test_aged_order_force_canceled_despite_tolerance() {
        let mut r = Reconciler::new(ReconcilerConfig {
            price_tolerance_cents: 99,
            ..config()
        });
        let live = vec![order("O1", Side::Yes, 45, 10, t0())];
        let now = t0() + Duration::seconds(301);
        let actions = r.reconcile("T", None, &live, now);
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            ReconcileAction::Cancel {
                reason: CancelReason::Expired,
                ..
            }
        ));
        assert!(actions[0].is_forced());
    }

    #[test]
    fn test_requote_throttle_defers_amend() {
        let mut r = Reconciler::new(config());
        let live = vec![order("O1", Side::Yes, 45, 10, t0())];

        // First tick: amend emitted, throttle clock starts.
        let desired = vec![intent(Side::Yes, 47, 10)];
        let actions = r.reconcile("T", Some(&desired), &live, t0());
        assert_eq!(actions.len(), 1);

        // One second later, price moved again: inside the interval, deferred.
        let desired = vec![intent(Side::Yes, 48, 10)];
        let actions = r.reconcile("T", Some(&desired), &live, t0() + Duration::seconds(1));
        assert!(actions.is_empty());

        // At the interval boundary the amend goes through.
        let actions = r.reconcile("T", Some(&desired), &live, t0() + Duration::seconds(2));
        assert_eq!(
            actions,
            vec![ReconcileAction::Amend {
                order_id: "O1".to_string(),
                intent: intent(Side::Yes, 48, 10)
            }]
        );
    }

    #[test]
    fn test_throttle_is_per_ticker() {
        let mut r = Reconciler::new(config());
        let desired_a = vec![OrderIntent::new("A", Side::Yes, 45, 10)];
        let desired_b = vec![OrderIntent::new("B", Side::Yes, 45, 10)];

        let actions = r.reconcile("A", Some(&desired_a), &[], t0());
        assert_eq!(actions.len(), 1);

        // Ticker B is not throttled by A's action.
        let actions = r.reconcile("B", Some(&desired_b), &[], t0() + Duration::seconds(1));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_noop_does_not_restart_throttle() {
        let mut r = Reconciler::new(config());
        let live = vec![order("O1", Side::Yes, 45, 10, t0())];

        // Desired matches live: no actions, no throttle clock.
        let desired = vec![intent(Side::Yes, 45, 10)];
        let actions = r.reconcile("T", Some(&desired), &live, t0());
        assert!(actions.is_empty());

        // An immediate follow-up change is not throttled.
        let desired = vec![intent(Side::Yes, 47, 10)];
        let actions = r.reconcile("T", Some(&desired), &live, t0() + Duration::milliseconds(100));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_cancels_ordered_before_places() {
        let mut r = Reconciler::new(config());
        let live = vec![order("O1", Side::No, 60, 5, t0())];
        let desired = vec![intent(Side::Yes, 45, 10)];
        let actions = r.reconcile("T", Some(&desired), &live, t0());
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], ReconcileAction::Cancel { .. }));
        assert!(matches!(actions[1], ReconcileAction::Place { .. }));
    }

    #[test]
    fn test_quantity_shortfall_amends() {
        let mut r = Reconciler::new(config());
        // Order partially canceled down to 4, intent wants 10 resting.
        let live = vec![order("O1", Side::Yes, 45, 4, t0())];
        let desired = vec![intent(Side::Yes, 45, 10)];
        let actions = r.reconcile("T", Some(&desired), &live, t0());
        assert!(matches!(&actions[0], ReconcileAction::Amend { .. }));
    }
}
