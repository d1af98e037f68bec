// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{error, info};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Heartbeat liveness --------
pub static HB_RECEIVED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("heartbeats_received_total", "inbound heartbeats").unwrap());

pub static HB_RESPONSES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("heartbeat_responses_total", "outbound heartbeat responses").unwrap()
});

pub static HB_DISCONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("heartbeat_disconnects_total", "peers declared dead").unwrap()
});

pub static HB_PEERS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("heartbeat_peers", "live heartbeat sessions").unwrap());

// -------- Trade aggregation --------
pub static EXECUTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("executions_total", "executions received"),
        &["provider"],
    )
    .unwrap()
});

pub static EXEC_REJECTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("executions_rejected_total", "executions refused by the aggregator").unwrap()
});

pub static TRADES_CLOSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("trades_closed_total", "round-trip trades completed"),
        &["symbol"],
    )
    .unwrap()
});

pub static POSITION_QTY: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("position_qty", "signed open position"),
        &["symbol", "provider"],
    )
    .unwrap()
});

pub static OPEN_TRADES: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("open_trades", "open trade layers"),
        &["symbol", "provider"],
    )
    .unwrap()
});

pub static REALIZED_PNL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("realized_pnl", "realized PnL of closed trades (ticks)"),
        &["symbol"],
    )
    .unwrap()
});

// ---- Config visibility ----
pub static CONFIG_INTERVAL_MS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_interval_ms", "heartbeat intervals (label: kind)"),
        &["kind"],
    )
    .unwrap()
});

pub fn init() {
    for m in [
        REGISTRY.register(Box::new(HB_RECEIVED.clone())),
        REGISTRY.register(Box::new(HB_RESPONSES.clone())),
        REGISTRY.register(Box::new(HB_DISCONNECTS.clone())),
        REGISTRY.register(Box::new(HB_PEERS.clone())),
        REGISTRY.register(Box::new(EXECUTIONS.clone())),
        REGISTRY.register(Box::new(EXEC_REJECTED.clone())),
        REGISTRY.register(Box::new(TRADES_CLOSED.clone())),
        REGISTRY.register(Box::new(POSITION_QTY.clone())),
        REGISTRY.register(Box::new(OPEN_TRADES.clone())),
        REGISTRY.register(Box::new(REALIZED_PNL.clone())),
        REGISTRY.register(Box::new(CONFIG_INTERVAL_MS.clone())),
    ] {
        if let Err(e) = m {
            error!(?e, "metric registration failed");
        }
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics), no request parsing
fn handle_client(mut stream: TcpStream) {
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Metrics server on a dedicated OS thread (keeps the Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                error!(?e, %addr, "metrics bind failed, endpoint disabled");
                return;
            }
        };
        info!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => error!(?e, "metrics accept error"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_registered_metrics() {
        init();
        HB_RECEIVED.inc();
        let text = String::from_utf8(encode_metrics()).unwrap();
        assert!(text.contains("heartbeats_received_total"));
    }
}
