//! Signal state machine
//!
//! Per-symbol divergence detection and paper-position tracking. A symbol is
//! either watched or carries one open position; positions average down on 1%
//! drops and close when the fixed sell target prints.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::binance::MarketData;
use crate::indicators::{momentum, RSI_PERIOD};
use crate::logs::{timestamp_now, CsvLogger, TelemetryRow, TradeRow};
use crate::reference::{round2, RefChanges, ReferenceTracker, REFERENCE_SYMBOL};
use crate::telegram::Notifier;
use crate::types::Position;

/// Configuration for the divergence signal
pub const RSI_15M_OVERSOLD: f64 = 10.0; // long frame deeply oversold
pub const RSI_5M_FLOOR: f64 = 15.0;     // mid frame already recovering
pub const RSI_1M_FLOOR: f64 = 25.0;     // short frame strengthening
const SELL_TARGET_FACTOR: f64 = 1.011;  // +1.1% exit, fixed at first entry
const RE_ENTRY_FACTOR: f64 = 0.99;      // average down on a further 1% drop
const ALERT_COOLDOWN_MINS: i64 = 30;    // per-symbol gap between fresh alerts

/// Drives entry, re-entry and exit decisions for every watched symbol.
///
/// Owns all per-symbol state; the market-data and notification ports are
/// injected so cycles can run against scripted doubles.
pub struct SignalEngine<M: MarketData, N: Notifier> {
    market: M,
    notifier: N,
    logger: CsvLogger,
    reference: ReferenceTracker,
    positions: HashMap<String, Position>,
    last_alerts: HashMap<String, DateTime<Utc>>,
}

impl<M: MarketData, N: Notifier> SignalEngine<M, N> {
    pub fn new(market: M, notifier: N, logger: CsvLogger) -> Self {
        Self {
            market,
            notifier,
            logger,
            reference: ReferenceTracker::new(),
            positions: HashMap::new(),
            last_alerts: HashMap::new(),
        }
    }

    /// One evaluation cycle for `symbol`.
    ///
    /// Missing market data aborts the cycle before anything is logged; an
    /// open position suppresses all new-entry logic for the symbol.
    pub async fn evaluate(&mut self, symbol: &str, token: &str, chat_ids: &[String]) {
        let closes_15m = self.market.closing_prices(symbol, "15m").await;
        let rsi_15m = match closes_15m.as_deref().and_then(|p| momentum(p, RSI_PERIOD)) {
            Some(v) => v,
            None => return,
        };

        let Some(closes_5m) = self.market.closing_prices(symbol, "5m").await else {
            return;
        };
        let Some(closes_1m) = self.market.closing_prices(symbol, "1m").await else {
            return;
        };
        let (Some(rsi_5m), Some(rsi_1m)) = (
            momentum(&closes_5m, RSI_PERIOD),
            momentum(&closes_1m, RSI_PERIOD),
        ) else {
            return;
        };
        let Some(&current_price) = closes_1m.last() else {
            return;
        };

        let ref_price = self.market.spot_price(REFERENCE_SYMBOL).await;
        let changes = self.reference.record(ref_price, Utc::now());

        println!(
            "[SIGNAL] {}: rsi15={:.1} rsi5={:.1} rsi1={:.1} price={} positions={}",
            symbol,
            rsi_15m,
            rsi_5m,
            rsi_1m,
            current_price,
            self.positions.len()
        );

        self.logger.log_telemetry(TelemetryRow {
            timestamp: timestamp_now(),
            symbol: symbol.to_string(),
            rsi_15m,
            rsi_5m,
            rsi_1m,
            price: current_price,
        });

        if let Some(pos) = self.positions.get_mut(symbol) {
            let qualifies = pos
                .entry_prices
                .first()
                .map_or(true, |&front| current_price <= front * RE_ENTRY_FACTOR);
            if current_price < pos.sell_price && qualifies {
                pos.entry_prices.insert(0, current_price);
                println!(
                    "[SIGNAL] {} averaging down at {} (entry #{})",
                    symbol,
                    current_price,
                    pos.entry_prices.len()
                );
                let text = position_text(symbol, pos);
                if let (Some(message_id), Some(chat_id)) = (pos.message_id, chat_ids.first()) {
                    self.notifier.edit(token, chat_id, message_id, &text).await;
                }
            }
            return;
        }

        // Divergence: long frame oversold while the short frames strengthen
        if rsi_15m < RSI_15M_OVERSOLD && rsi_5m > RSI_5M_FLOOR && rsi_1m > RSI_1M_FLOOR {
            let now = Utc::now();
            if let Some(last) = self.last_alerts.get(symbol) {
                if now - *last < Duration::minutes(ALERT_COOLDOWN_MINS) {
                    return;
                }
            }
            self.last_alerts.insert(symbol.to_string(), now);

            let sell_price = current_price * SELL_TARGET_FACTOR;
            let text = entry_text(
                symbol,
                current_price,
                sell_price,
                rsi_15m,
                rsi_5m,
                rsi_1m,
                &changes,
            );

            let mut message_id = None;
            for (i, chat_id) in chat_ids.iter().enumerate() {
                let id = self.notifier.send(token, chat_id, &text).await;
                // later edits only ever touch the first chat's message
                if i == 0 {
                    message_id = id;
                }
            }

            println!(
                "[SIGNAL] {} BUY at {} target {}",
                symbol, current_price, sell_price
            );

            self.positions.insert(
                symbol.to_string(),
                Position {
                    entry_prices: vec![current_price],
                    sell_price,
                    message_id,
                    buy_time: now,
                    btc_price_at_buy: changes.price,
                    bottom_price: current_price,
                },
            );
        }
    }

    /// Sweep all open positions against their exit targets.
    ///
    /// Runs on its own cadence, independent of `evaluate`. A failed fetch
    /// skips just that symbol for this sweep.
    pub async fn check_targets(&mut self, token: &str, chat_ids: &[String]) {
        let symbols: Vec<String> = self.positions.keys().cloned().collect();
        for symbol in symbols {
            let Some(current_price) = self.market.spot_price(&symbol).await else {
                continue;
            };
            let ref_price = self.market.spot_price(REFERENCE_SYMBOL).await;
            let changes = self.reference.record(ref_price, Utc::now());

            let mut closed = false;
            if let Some(pos) = self.positions.get_mut(&symbol) {
                if current_price < pos.bottom_price {
                    pos.bottom_price = current_price;
                }

                if current_price >= pos.sell_price {
                    let first_entry = pos.first_entry();
                    let held = format_duration(Utc::now() - pos.buy_time);
                    let drop_pct =
                        round2((first_entry - pos.bottom_price) / first_entry * 100.0);
                    let btc_change_pct = match (pos.btc_price_at_buy, changes.price) {
                        (Some(at_buy), Some(now_price)) if at_buy > 0.0 => {
                            Some(round2((now_price - at_buy) / at_buy * 100.0))
                        }
                        _ => None,
                    };

                    let text = target_text(
                        &symbol,
                        pos,
                        current_price,
                        &held,
                        drop_pct,
                        btc_change_pct,
                    );
                    if let (Some(message_id), Some(chat_id)) = (pos.message_id, chat_ids.first())
                    {
                        self.notifier.edit(token, chat_id, message_id, &text).await;
                    }

                    println!(
                        "[SIGNAL] {} target hit at {} after {} (bottom {}, drop {:.2}%)",
                        symbol, current_price, held, pos.bottom_price, drop_pct
                    );

                    self.logger.log_trade(TradeRow {
                        timestamp: timestamp_now(),
                        symbol: symbol.clone(),
                        rsi_15m_threshold: RSI_15M_OVERSOLD,
                        rsi_5m_threshold: RSI_5M_FLOOR,
                        rsi_1m_threshold: RSI_1M_FLOOR,
                        entry_price: first_entry,
                        sell_price: pos.sell_price,
                        duration: held,
                        bottom_price: pos.bottom_price,
                        drop_pct,
                        btc_change_pct,
                        btc_change_30m_pct: changes.change_30m,
                    });

                    closed = true;
                }
            }

            if closed {
                self.positions.remove(&symbol);
            }
        }
    }
}

fn entry_text(
    symbol: &str,
    entry: f64,
    sell: f64,
    rsi_15m: f64,
    rsi_5m: f64,
    rsi_1m: f64,
    changes: &RefChanges,
) -> String {
    let mut text = format!(
        "🟢 {} buy signal\nRSI 15m {:.1} | 5m {:.1} | 1m {:.1}\nEntry: {}\nTarget: {}",
        symbol, rsi_15m, rsi_5m, rsi_1m, entry, sell
    );
    if let Some(line) = reference_line(changes) {
        text.push('\n');
        text.push_str(&line);
    }
    text
}

fn position_text(symbol: &str, pos: &Position) -> String {
    format!(
        "🟢 {} averaging down\nEntries: {}\nTarget: {}",
        symbol,
        join_prices(&pos.entry_prices),
        pos.sell_price
    )
}

fn target_text(
    symbol: &str,
    pos: &Position,
    current: f64,
    held: &str,
    drop_pct: f64,
    btc_change_pct: Option<f64>,
) -> String {
    format!(
        "✅ {} target achieved at {}\nEntries: {}\nTarget: {}\nHeld: {}\nBottom: {} ({:.2}% below entry)\nBTC since entry: {}",
        symbol,
        current,
        join_prices(&pos.entry_prices),
        pos.sell_price,
        held,
        pos.bottom_price,
        drop_pct,
        pct_or_na(btc_change_pct)
    )
}

fn reference_line(changes: &RefChanges) -> Option<String> {
    let price = changes.price?;
    Some(format!(
        "BTC {} ({} now, {} 30m)",
        price,
        pct_or_na(changes.change),
        pct_or_na(changes.change_30m)
    ))
}

fn pct_or_na(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:+.2}%", v))
        .unwrap_or_else(|| "n/a".to_string())
}

fn join_prices(prices: &[f64]) -> String {
    prices
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render an elapsed duration as e.g. "2d 4h 13m".
fn format_duration(elapsed: Duration) -> String {
    let total_mins = elapsed.num_minutes().max(0);
    let days = total_mins / 1440;
    let hours = (total_mins % 1440) / 60;
    let mins = total_mins % 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, mins)
    } else if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else {
        format!("{}m", mins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct ScriptedMarket {
        series: Mutex<HashMap<(String, String), Vec<f64>>>,
        spots: Mutex<HashMap<String, f64>>,
    }

    impl ScriptedMarket {
        fn set_series(&self, symbol: &str, interval: &str, closes: Vec<f64>) {
            self.series
                .lock()
                .unwrap()
                .insert((symbol.to_string(), interval.to_string()), closes);
        }

        fn set_spot(&self, symbol: &str, price: f64) {
            self.spots.lock().unwrap().insert(symbol.to_string(), price);
        }
    }

    #[async_trait]
    impl MarketData for Arc<ScriptedMarket> {
        async fn closing_prices(&self, symbol: &str, interval: &str) -> Option<Vec<f64>> {
            self.series
                .lock()
                .unwrap()
                .get(&(symbol.to_string(), interval.to_string()))
                .cloned()
        }

        async fn spot_price(&self, symbol: &str) -> Option<f64> {
            self.spots.lock().unwrap().get(symbol).copied()
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        next_id: AtomicI64,
        sends: Mutex<Vec<(String, String)>>,
        edits: Mutex<Vec<(String, i64, String)>>,
    }

    #[async_trait]
    impl Notifier for Arc<RecordingNotifier> {
        async fn send(&self, _token: &str, chat_id: &str, text: &str) -> Option<i64> {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            self.sends
                .lock()
                .unwrap()
                .push((chat_id.to_string(), text.to_string()));
            Some(id)
        }

        async fn edit(&self, _token: &str, chat_id: &str, message_id: i64, text: &str) {
            self.edits
                .lock()
                .unwrap()
                .push((chat_id.to_string(), message_id, text.to_string()));
        }
    }

    type TestEngine = SignalEngine<Arc<ScriptedMarket>, Arc<RecordingNotifier>>;

    fn test_logger(tag: &str) -> CsvLogger {
        let dir = std::env::temp_dir();
        CsvLogger::with_paths(
            dir.join(format!("signal_bot_{}_{}_t.csv", tag, std::process::id())),
            dir.join(format!("signal_bot_{}_{}_x.csv", tag, std::process::id())),
        )
    }

    fn engine_with(
        tag: &str,
        market: &Arc<ScriptedMarket>,
        notifier: &Arc<RecordingNotifier>,
    ) -> TestEngine {
        SignalEngine::new(Arc::clone(market), Arc::clone(notifier), test_logger(tag))
    }

    /// Strictly falling window, momentum 0.
    fn falling() -> Vec<f64> {
        (0..15).map(|i| 200.0 - i as f64).collect()
    }

    /// Strictly rising window ending at `last`, momentum 100.
    fn rising_to(last: f64) -> Vec<f64> {
        (0..15).map(|i| last - (14 - i) as f64).collect()
    }

    fn qualifying_market(symbol: &str, current: f64) -> Arc<ScriptedMarket> {
        let market = Arc::new(ScriptedMarket::default());
        market.set_series(symbol, "15m", falling());
        market.set_series(symbol, "5m", rising_to(50.0));
        market.set_series(symbol, "1m", rising_to(current));
        market.set_spot(REFERENCE_SYMBOL, 40_000.0);
        market
    }

    fn chats() -> Vec<String> {
        vec!["111".to_string(), "222".to_string()]
    }

    #[tokio::test]
    async fn test_buy_signal_opens_position() {
        let market = qualifying_market("AAAUSDT", 100.0);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut engine = engine_with("open", &market, &notifier);

        engine.evaluate("AAAUSDT", "tok", &chats()).await;

        assert_eq!(notifier.sends.lock().unwrap().len(), 2);
        let pos = engine.positions.get("AAAUSDT").unwrap();
        assert_eq!(pos.entry_prices, vec![100.0]);
        assert!((pos.sell_price - 101.1).abs() < 1e-9);
        assert_eq!(pos.message_id, Some(1));
        assert_eq!(pos.bottom_price, 100.0);
        assert_eq!(pos.btc_price_at_buy, Some(40_000.0));
    }

    #[tokio::test]
    async fn test_open_position_is_idempotent_on_unchanged_price() {
        let market = qualifying_market("AAAUSDT", 100.0);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut engine = engine_with("idem", &market, &notifier);

        engine.evaluate("AAAUSDT", "tok", &chats()).await;
        engine.evaluate("AAAUSDT", "tok", &chats()).await;

        let pos = engine.positions.get("AAAUSDT").unwrap();
        assert_eq!(pos.entry_prices, vec![100.0]);
        assert!(notifier.edits.lock().unwrap().is_empty());
        assert_eq!(notifier.sends.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_re_entries_cascade_from_the_front_entry() {
        let market = qualifying_market("AAAUSDT", 100.0);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut engine = engine_with("cascade", &market, &notifier);

        engine.evaluate("AAAUSDT", "tok", &chats()).await;

        // 99.0 is a full 1% below the front entry of 100.0
        market.set_series("AAAUSDT", "1m", rising_to(99.0));
        engine.evaluate("AAAUSDT", "tok", &chats()).await;

        // 98.0 is more than 1% below the new front entry of 99.0
        market.set_series("AAAUSDT", "1m", rising_to(98.0));
        engine.evaluate("AAAUSDT", "tok", &chats()).await;

        let pos = engine.positions.get("AAAUSDT").unwrap();
        assert_eq!(pos.entry_prices, vec![98.0, 99.0, 100.0]);
        assert!((pos.sell_price - 101.1).abs() < 1e-9);

        let edits = notifier.edits.lock().unwrap();
        assert_eq!(edits.len(), 2);
        // edits always target the first recipient's message
        assert!(edits.iter().all(|(chat, id, _)| chat == "111" && *id == 1));
        assert!(edits[1].2.contains("98, 99, 100"));
    }

    #[tokio::test]
    async fn test_price_within_one_percent_does_not_re_enter() {
        let market = qualifying_market("AAAUSDT", 100.0);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut engine = engine_with("near", &market, &notifier);

        engine.evaluate("AAAUSDT", "tok", &chats()).await;

        // 99.5 is only 0.5% below the front entry
        market.set_series("AAAUSDT", "1m", rising_to(99.5));
        engine.evaluate("AAAUSDT", "tok", &chats()).await;

        let pos = engine.positions.get("AAAUSDT").unwrap();
        assert_eq!(pos.entry_prices, vec![100.0]);
        assert!(notifier.edits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_repeat_alerts() {
        let market = qualifying_market("AAAUSDT", 100.0);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut engine = engine_with("cooldown", &market, &notifier);

        engine.evaluate("AAAUSDT", "tok", &chats()).await;
        assert_eq!(notifier.sends.lock().unwrap().len(), 2);

        // Position closed but the alert is still fresh
        engine.positions.remove("AAAUSDT");
        engine.evaluate("AAAUSDT", "tok", &chats()).await;
        assert!(engine.positions.is_empty());
        assert_eq!(notifier.sends.lock().unwrap().len(), 2);

        // Cooldown expired
        engine
            .last_alerts
            .insert("AAAUSDT".to_string(), Utc::now() - Duration::minutes(31));
        engine.evaluate("AAAUSDT", "tok", &chats()).await;
        assert!(engine.positions.contains_key("AAAUSDT"));
        assert_eq!(notifier.sends.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_target_achievement_clears_position() {
        let market = qualifying_market("AAAUSDT", 100.0);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut engine = engine_with("target", &market, &notifier);

        engine.evaluate("AAAUSDT", "tok", &chats()).await;
        let sell_price = engine.positions.get("AAAUSDT").unwrap().sell_price;

        for price in [99.0, 98.0, 99.0] {
            market.set_spot("AAAUSDT", price);
            engine.check_targets("tok", &chats()).await;
            assert!(engine.positions.contains_key("AAAUSDT"));
        }
        assert_eq!(engine.positions.get("AAAUSDT").unwrap().bottom_price, 98.0);

        market.set_spot("AAAUSDT", sell_price);
        engine.check_targets("tok", &chats()).await;

        assert!(engine.positions.is_empty());
        let edits = notifier.edits.lock().unwrap();
        let (chat, id, text) = edits.last().unwrap();
        assert_eq!(chat, "111");
        assert_eq!(*id, 1);
        assert!(text.contains("target achieved"));
        assert!(text.contains("2.00% below entry"));
    }

    #[tokio::test]
    async fn test_missing_series_aborts_cycle() {
        let market = Arc::new(ScriptedMarket::default());
        market.set_series("AAAUSDT", "15m", falling());
        market.set_series("AAAUSDT", "5m", rising_to(50.0));
        market.set_spot(REFERENCE_SYMBOL, 40_000.0);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut engine = engine_with("missing", &market, &notifier);

        engine.evaluate("AAAUSDT", "tok", &chats()).await;

        assert!(engine.positions.is_empty());
        assert!(notifier.sends.lock().unwrap().is_empty());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::minutes(7)), "7m");
        assert_eq!(format_duration(Duration::minutes(133)), "2h 13m");
        assert_eq!(format_duration(Duration::minutes(1573)), "1d 2h 13m");
    }
}
