// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : trade_manager_rust — heartbeat liveness & trade aggregation core
Module  : config.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Tracks peer engines over a heartbeat protocol (disconnect
          detection + periodic keep-alive replies) and folds order
          executions into FIFO-matched round-trip trades per security and
          provider, exposes Prometheus metrics, and records JSONL events.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

use crate::domain::Security;
use crate::heartbeat::HeartbeatCfg;

#[derive(Clone, Debug)]
pub struct Args {
    // heartbeat
    pub application_id: String,
    pub validation_interval_ms: u64,
    pub response_interval_ms: u64,

    // files/metrics/logging
    pub record_file: Option<String>,
    pub metrics_port: u16,
    pub log_filter: String,

    // mock inputs
    pub provider: String,
    pub exchange: String,
    pub symbols: Vec<String>,
    pub mock_peers: u32,
    pub peer_heartbeat_ms: u64,
    pub peer_silent_after: Option<u32>,
    pub exec_interval_ms: u64,
}

impl Args {
    pub fn heartbeat_cfg(&self) -> HeartbeatCfg {
        HeartbeatCfg {
            application_id: self.application_id.clone(),
            validation_interval: Duration::from_millis(self.validation_interval_ms),
            response_interval: Duration::from_millis(self.response_interval_ms),
        }
    }

    pub fn securities(&self) -> Vec<Security> {
        self.symbols.iter().map(|s| Security::new(s.clone(), self.exchange.clone())).collect()
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// `SYMBOLS=BTCUSDT,ETHUSDT` -> upper-cased, blanks dropped.
pub fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .map(|x| x.to_ascii_uppercase())
        .collect()
}

pub fn load() -> Args {
    // .env first so RECORD_FILE, SYMBOLS, ... are visible
    let _ = dotenv();

    // ===== Heartbeat =====
    let application_id = env_string("APPLICATION_ID", "trade-manager");
    let validation_interval_ms = env_or("VALIDATION_INTERVAL_MS", 10_000);
    let response_interval_ms = env_or("RESPONSE_INTERVAL_MS", 120_000u64).max(1);

    // ===== Files / metrics =====
    let record_file = env::var("RECORD_FILE").ok().filter(|s| !s.trim().is_empty());
    let metrics_port = env_or("METRICS_PORT", 9898);
    let log_filter = env_string("LOG_FILTER", "info");

    // ===== Mock inputs =====
    let symbols = Some(parse_symbols(&env_string("SYMBOLS", "BTCUSDT")))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec!["BTCUSDT".to_string()]);
    let peer_silent_after = Some(env_or("PEER_SILENT_AFTER", 0u32)).filter(|n| *n > 0);

    Args {
        application_id,
        validation_interval_ms,
        response_interval_ms,
        record_file,
        metrics_port,
        log_filter,
        provider: env_string("PROVIDER", "SIM"),
        exchange: env_string("EXCHANGE", "BINANCE"),
        symbols,
        mock_peers: env_or("MOCK_PEERS", 2),
        peer_heartbeat_ms: env_or("PEER_HEARTBEAT_MS", 1_000u64).max(1),
        peer_silent_after,
        exec_interval_ms: env_or("EXEC_INTERVAL_MS", 250u64).max(1),
    }
}
