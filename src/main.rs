mod binance;
mod indicators;
mod logs;
mod reference;
mod signals;
mod telegram;
mod types;

use std::sync::Arc;
use tokio::sync::Mutex;

use binance::BinanceClient;
use logs::CsvLogger;
use signals::SignalEngine;
use telegram::TelegramClient;

/// Cycle cadences (seconds)
const EVAL_INTERVAL_SECS: u64 = 60;
const TARGET_CHECK_INTERVAL_SECS: u64 = 20;

const DEFAULT_SYMBOLS: &str = "BTCUSDT,ETHUSDT,BNBUSDT,SOLUSDT,XRPUSDT";

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    println!("Starting RSI Divergence Signal Bot...");

    let token = std::env::var("TELEGRAM_BOT_TOKEN").expect("TELEGRAM_BOT_TOKEN must be set");
    let chat_ids: Vec<String> = std::env::var("TELEGRAM_CHAT_IDS")
        .expect("TELEGRAM_CHAT_IDS must be set")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let symbols: Vec<String> = std::env::var("WATCH_SYMBOLS")
        .unwrap_or_else(|_| DEFAULT_SYMBOLS.to_string())
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();

    println!(
        "Watching {} symbols, alerting {} chat(s) | eval every {}s, target sweep every {}s",
        symbols.len(),
        chat_ids.len(),
        EVAL_INTERVAL_SECS,
        TARGET_CHECK_INTERVAL_SECS
    );

    let engine = Arc::new(Mutex::new(SignalEngine::new(
        BinanceClient::new(),
        TelegramClient::new(),
        CsvLogger::new(),
    )));

    // Evaluation loop: one pass over the watch list per tick
    let eval_engine = Arc::clone(&engine);
    let eval_token = token.clone();
    let eval_chats = chat_ids.clone();
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(tokio::time::Duration::from_secs(EVAL_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            for symbol in &symbols {
                eval_engine
                    .lock()
                    .await
                    .evaluate(symbol, &eval_token, &eval_chats)
                    .await;
            }
        }
    });

    // Target sweep on its own cadence
    let sweep_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(tokio::time::Duration::from_secs(TARGET_CHECK_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            sweep_engine.lock().await.check_targets(&token, &chat_ids).await;
        }
    });

    // Keep main alive
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(60)).await;
    }
}
