// Shared types for the signal bot

use chrono::{DateTime, Utc};

/// An open synthetic position for one symbol
#[derive(Debug, Clone)]
pub struct Position {
    /// Entry prices, most recent first; grows by one per averaging-down re-entry
    pub entry_prices: Vec<f64>,
    /// Exit target, fixed at first entry, never recomputed
    pub sell_price: f64,
    /// Message id of the first recipient's alert; later edits target it
    pub message_id: Option<i64>,
    pub buy_time: DateTime<Utc>,
    /// Reference-asset price snapshot taken at first entry
    pub btc_price_at_buy: Option<f64>,
    /// Lowest price observed while the position is open
    pub bottom_price: f64,
}

impl Position {
    /// The original entry, i.e. the last element of the most-recent-first stack.
    pub fn first_entry(&self) -> f64 {
        *self.entry_prices.last().unwrap_or(&self.sell_price)
    }
}
