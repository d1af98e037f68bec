// ===============================
// src/main.rs
// ===============================
/*
 # metrics
 curl -s localhost:9898/metrics | egrep '^heartbeat_|^position_qty|^trades_closed_total'

 # watch a peer drop: the last mock peer goes silent after 5 beats
 MOCK_PEERS=3 PEER_SILENT_AFTER=5 VALIDATION_INTERVAL_MS=2000 cargo run
*/
/*
=============================================================================
Project : trade_manager_rust — heartbeat liveness & trade aggregation core
Module  : main.rs
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
mod config;
mod domain;
mod feed;       // mock peers + mock execution stream
mod heartbeat;
mod liveness;
mod metrics;
mod outbound;   // monitor events -> transport publisher
mod posttrade;  // trade sink consumer
mod recorder;
mod registry;
mod trades;

use std::sync::Arc;

use tokio::{
    select,
    sync::{mpsc, watch},
    time::{interval, Duration},
};
use tracing::{error, info};

use crate::domain::{Event, Execution, Heartbeat, OutboundEvent};
use crate::heartbeat::HeartbeatMonitor;
use crate::registry::{ChannelSink, TradeRegistry};
use crate::trades::{IdGenerator, PositionSnapshot, Trade};

#[tokio::main]
async fn main() {
    // ---- Config & logging ----
    let args = config::load();
    tracing_subscriber::fmt().with_env_filter(args.log_filter.as_str()).init();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    info!(
        app_id = %args.application_id,
        validation_ms = args.validation_interval_ms,
        response_ms = args.response_interval_ms,
        provider = %args.provider,
        symbols = ?args.symbols,
        mock_peers = args.mock_peers,
        record_file = ?args.record_file,
        "startup config"
    );
    crate::metrics::CONFIG_INTERVAL_MS
        .with_label_values(&["validation"])
        .set(args.validation_interval_ms as i64);
    crate::metrics::CONFIG_INTERVAL_MS
        .with_label_values(&["response"])
        .set(args.response_interval_ms as i64);

    let monitor = match HeartbeatMonitor::new(args.heartbeat_cfg()) {
        Ok(m) => m,
        Err(e) => {
            error!(err = %e, "invalid heartbeat config");
            return;
        }
    };

    // ---- Buses ----
    let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
    let (hb_tx, hb_rx) = mpsc::channel::<Heartbeat>(1024);
    let (out_tx, out_rx) = mpsc::channel::<OutboundEvent>(1024);
    let (exec_tx, exec_rx) = mpsc::channel::<Execution>(4096);
    let (trade_tx, trade_rx) = mpsc::channel::<Trade>(4096);
    let (snap_tx, snap_rx) = watch::channel::<Vec<PositionSnapshot>>(Vec::new());

    // ---- Recorder (optional) ----
    if let Some(path) = args.record_file.clone() {
        tokio::spawn(recorder::run(rec_rx, path));
    }

    // ---- Heartbeat: inbound consumer, outbound publisher ----
    outbound::attach(&monitor, out_tx);
    tokio::spawn(outbound::run(out_rx, rec_tx.clone()));
    tokio::spawn(heartbeat::run(hb_rx, monitor.clone(), rec_tx.clone()));

    for i in 0..args.mock_peers {
        let app_id = format!("engine-{}", i + 1);
        // only the last peer goes silent
        let silent = if i + 1 == args.mock_peers { args.peer_silent_after } else { None };
        tokio::spawn(feed::run_mock_peer(hb_tx.clone(), app_id, args.peer_heartbeat_ms, silent));
    }

    // ---- Trades: dispatch -> aggregators -> sink -> post-trade ----
    let registry = TradeRegistry::new(
        Arc::new(IdGenerator::starting_at(1)),
        Arc::new(ChannelSink::new(trade_tx)),
    );
    tokio::spawn(registry::run(exec_rx, registry, snap_tx, rec_tx.clone()));
    tokio::spawn(posttrade::run(trade_rx, rec_tx.clone()));
    tokio::spawn(feed::run_mock_executions(
        exec_tx,
        args.securities(),
        args.provider.clone(),
        args.exec_interval_ms,
    ));

    let _ = rec_tx.try_send(Event::Note(format!("started as {}", args.application_id)));

    // ---- Status line ----
    let mut status = interval(Duration::from_secs(5));
    loop {
        select! {
            _ = status.tick() => {
                let positions: Vec<String> = snap_rx
                    .borrow()
                    .iter()
                    .map(|s| format!("{}/{}={} ({} open)", s.security, s.provider, s.position, s.open_trades.len()))
                    .collect();
                info!(sessions = monitor.len(), peers = ?monitor.connected(), positions = ?positions, "status");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                monitor.shutdown();
                break;
            }
        }
    }
}
