// ===============================
// src/posttrade.rs
// ===============================
//
// Receiving end of the trade sink: every completed round-trip is logged
// and handed to the recorder. Failures are logged only, never retried.
//
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::Event;
use crate::trades::Trade;

pub async fn run(mut trade_rx: mpsc::Receiver<Trade>, rec_tx: mpsc::Sender<Event>) {
    while let Some(t) = trade_rx.recv().await {
        info!(
            trade_id = t.trade_id,
            security = %t.security,
            provider = %t.provider,
            side = ?t.side,
            qty = t.open.qty,
            entry_px = t.open.px,
            exit_px = ?t.avg_exit_px(),
            fills = t.fills.len(),
            pnl = t.realized_pnl(),
            "TRADE CLOSED"
        );
        if let Err(e) = rec_tx.try_send(Event::Trade(t)) {
            warn!(err = %e, "posttrade: recorder busy, trade not recorded");
        }
    }
    info!("posttrade: channel closed, stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Security, Side, TradeFill};

    #[tokio::test]
    async fn forwards_trades_to_recorder() {
        let (trade_tx, trade_rx) = mpsc::channel(4);
        let (rec_tx, mut rec_rx) = mpsc::channel(4);
        let task = tokio::spawn(run(trade_rx, rec_tx));

        let open = TradeFill { execution_id: "E1".into(), qty: 5, px: 10, ts_ns: 1 };
        let t = Trade::new(3, Security::new("ES", "CME"), "SIM".into(), Side::Buy, open);
        trade_tx.send(t).await.unwrap();
        drop(trade_tx);
        task.await.unwrap();

        match rec_rx.recv().await {
            Some(Event::Trade(t)) => assert_eq!(t.trade_id, 3),
            other => panic!("unexpected {other:?}"),
        }
    }
}
