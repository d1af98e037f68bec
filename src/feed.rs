// ===============================
// src/feed.rs
// ===============================
//
// Stand-alone inputs, used when no transport is attached:
// - run_mock_peer       : a remote engine sending heartbeats at its declared
//                         interval; optionally goes silent after N beats so
//                         the disconnect path can be watched live.
// - run_mock_executions : random-walk fills (BUY/SELL/SHORT/COVER) across the
//                         configured securities for one provider.
//
// Notes:
// - Prices in ticks (px * 100), quantities in lots of 10.
//
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::domain::{now_ns, ExecSide, Execution, Fill, Heartbeat, Order, Security};

pub async fn run_mock_peer(
    hb_tx: mpsc::Sender<Heartbeat>,
    application_id: String,
    interval_ms: u64,
    silent_after: Option<u32>,
) {
    let hb = Heartbeat {
        application_id: application_id.clone(),
        heartbeat_interval_ms: interval_ms,
        reply_to: format!("{application_id}.heartbeat"),
    };
    let mut sent: u32 = 0;
    loop {
        if silent_after.is_some_and(|n| sent >= n) {
            info!(app_id = %application_id, sent, "mock peer going silent");
            return;
        }
        if hb_tx.send(hb.clone()).await.is_err() {
            return;
        }
        sent += 1;
        sleep(Duration::from_millis(interval_ms)).await;
    }
}

fn random_side(position: i64) -> ExecSide {
    // no ThreadRng across .await
    let mut rng = rand::thread_rng();
    match (position.signum(), rng.gen_range(0..4)) {
        (1, 0) | (1, 1) => ExecSide::Sell,
        (-1, 0) | (-1, 1) => ExecSide::Cover,
        (-1, _) => ExecSide::Short,
        (_, 2) => ExecSide::Short,
        _ => ExecSide::Buy,
    }
}

pub async fn run_mock_executions(
    exec_tx: mpsc::Sender<Execution>,
    securities: Vec<Security>,
    provider: String,
    interval_ms: u64,
) {
    if securities.is_empty() {
        warn!("mock executions: no securities configured");
        return;
    }
    let mut px: Vec<i64> = vec![100_00; securities.len()];
    let mut pos: Vec<i64> = vec![0; securities.len()];
    let mut seq: u64 = 0;
    loop {
        let (i, step, lots) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(0..securities.len()), rng.gen_range(-5..=5), rng.gen_range(1..=10))
        };
        px[i] = (px[i] + step).max(50_00);
        let side = random_side(pos[i]);
        let qty = lots * 10;
        pos[i] += side.sign() * qty;
        seq += 1;

        let exec = Execution {
            order: Order {
                order_id: format!("OR-{provider}-{seq}"),
                side,
                security: securities[i].clone(),
                provider: provider.clone(),
            },
            fill: Fill { execution_id: format!("EX-{provider}-{seq}"), side, qty, px: px[i], ts_ns: now_ns() },
        };
        if exec_tx.send(exec).await.is_err() {
            return;
        }
        sleep(Duration::from_millis(interval_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn peer_goes_silent_after_limit() {
        let (tx, mut rx) = mpsc::channel(16);
        run_mock_peer(tx, "md-engine".into(), 100, Some(3)).await;
        let mut n = 0;
        while let Ok(hb) = rx.try_recv() {
            assert_eq!(hb.reply_to, "md-engine.heartbeat");
            n += 1;
        }
        assert_eq!(n, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn executions_are_well_formed() {
        let (tx, mut rx) = mpsc::channel(4);
        let secs = vec![Security::new("BTCUSDT", "BINANCE")];
        tokio::spawn(run_mock_executions(tx, secs, "SIM".into(), 10));
        for _ in 0..20 {
            let e = rx.recv().await.unwrap();
            assert!(e.fill.qty > 0 && e.fill.qty % 10 == 0);
            assert_eq!(e.order.provider, "SIM");
            assert_eq!(e.order.side, e.fill.side);
        }
    }
}
