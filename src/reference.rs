//! Reference-asset tracker
//!
//! Keeps a short rolling price history for the benchmark coin so alerts can
//! report how the wider market moved while a signal played out.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

pub const REFERENCE_SYMBOL: &str = "BTCUSDT";

const HISTORY_RETENTION_MINS: i64 = 31; // samples older than this are dropped
const CHANGE_LOOKBACK_MINS: i64 = 30;

#[derive(Debug, Clone, Copy)]
struct RefSample {
    price: f64,
    ts: DateTime<Utc>,
}

/// Change figures derived on every poll of the reference asset
#[derive(Debug, Clone, Copy, Default)]
pub struct RefChanges {
    pub price: Option<f64>,
    /// Percent delta vs. the previous poll; None on the first poll
    pub change: Option<f64>,
    /// Percent delta vs. the oldest sample that is at least 30 minutes old
    pub change_30m: Option<f64>,
}

#[derive(Default)]
pub struct ReferenceTracker {
    /// Chronologically ordered; pruned from the front after each insert
    history: VecDeque<RefSample>,
    last_price: Option<f64>,
}

impl ReferenceTracker {
    pub fn new() -> Self {
        Self {
            history: VecDeque::new(),
            last_price: None,
        }
    }

    /// Record one poll of the reference asset and derive the change figures.
    ///
    /// A failed fetch (`None`) yields all-None and leaves the history and the
    /// last-price slot untouched.
    pub fn record(&mut self, price: Option<f64>, now: DateTime<Utc>) -> RefChanges {
        let Some(price) = price else {
            return RefChanges::default();
        };

        self.history.push_back(RefSample { price, ts: now });
        let cutoff = now - Duration::minutes(HISTORY_RETENTION_MINS);
        while let Some(front) = self.history.front() {
            if front.ts < cutoff {
                self.history.pop_front();
            } else {
                break;
            }
        }

        let change = self
            .last_price
            .filter(|prev| *prev > 0.0)
            .map(|prev| round2((price - prev) / prev * 100.0));
        self.last_price = Some(price);

        // Front of the deque is oldest, so the first match is the oldest
        // sample already past the lookback
        let lookback = now - Duration::minutes(CHANGE_LOOKBACK_MINS);
        let change_30m = self
            .history
            .iter()
            .find(|s| s.ts <= lookback)
            .filter(|s| s.price > 0.0)
            .map(|s| round2((price - s.price) / s.price * 100.0));

        RefChanges {
            price: Some(price),
            change,
            change_30m,
        }
    }
}

/// Round to two decimal places for reporting.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
