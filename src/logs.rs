//! Durable CSV logs for evaluations and completed trades.
//!
//! Writer tasks drain unbounded channels so the signal engine never blocks on
//! file I/O; a failed write is reported and dropped.

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

pub const TELEMETRY_LOG_FILE: &str = "momentum_log.csv";
pub const TRADE_LOG_FILE: &str = "trade_log.csv";

/// One row per successful evaluation cycle
#[derive(Debug, Serialize)]
pub struct TelemetryRow {
    pub timestamp: String,
    pub symbol: String,
    pub rsi_15m: f64,
    pub rsi_5m: f64,
    pub rsi_1m: f64,
    pub price: f64,
}

/// One row per closed position
#[derive(Debug, Serialize)]
pub struct TradeRow {
    pub timestamp: String,
    pub symbol: String,
    pub rsi_15m_threshold: f64,
    pub rsi_5m_threshold: f64,
    pub rsi_1m_threshold: f64,
    pub entry_price: f64,
    pub sell_price: f64,
    pub duration: String,
    pub bottom_price: f64,
    pub drop_pct: f64,
    pub btc_change_pct: Option<f64>,
    pub btc_change_30m_pct: Option<f64>,
}

/// Log sender usable from anywhere in the engine (non-blocking).
#[derive(Clone)]
pub struct CsvLogger {
    telemetry_tx: UnboundedSender<TelemetryRow>,
    trade_tx: UnboundedSender<TradeRow>,
}

impl CsvLogger {
    /// Logger writing the default files in the working directory.
    pub fn new() -> Self {
        Self::with_paths(TELEMETRY_LOG_FILE, TRADE_LOG_FILE)
    }

    /// Logger with explicit file paths; spawns one writer task per file.
    pub fn with_paths(telemetry: impl Into<PathBuf>, trades: impl Into<PathBuf>) -> Self {
        let (telemetry_tx, mut telemetry_rx) = unbounded_channel::<TelemetryRow>();
        let (trade_tx, mut trade_rx) = unbounded_channel::<TradeRow>();

        let path = telemetry.into();
        tokio::spawn(async move {
            while let Some(row) = telemetry_rx.recv().await {
                if let Err(e) = append_row(&path, &row) {
                    eprintln!("[CSV] telemetry write error: {:#}", e);
                }
            }
        });

        let path = trades.into();
        tokio::spawn(async move {
            while let Some(row) = trade_rx.recv().await {
                if let Err(e) = append_row(&path, &row) {
                    eprintln!("[CSV] trade write error: {:#}", e);
                }
            }
        });

        Self {
            telemetry_tx,
            trade_tx,
        }
    }

    /// Log one evaluation (fire-and-forget).
    pub fn log_telemetry(&self, row: TelemetryRow) {
        let _ = self.telemetry_tx.send(row);
    }

    /// Log one completed trade (fire-and-forget).
    pub fn log_trade(&self, row: TradeRow) {
        let _ = self.trade_tx.send(row);
    }
}

/// Row timestamp shared by both logs.
pub fn timestamp_now() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Append one serialized row, emitting the header when the file is new.
fn append_row<R: Serialize>(path: &Path, row: &R) -> anyhow::Result<()> {
    let new_file = !path.exists();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(new_file)
        .from_writer(file);
    writer.serialize(row)?;
    writer.flush()?;
    Ok(())
}
