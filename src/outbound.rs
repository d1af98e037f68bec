// ===============================
// src/outbound.rs
// ===============================
//
// Publisher side of the heartbeat monitor. The monitor's listeners push
// OutboundEvent here; this task stands where the transport publisher sits
// (responses go to the peer's reply-to, disconnects to whoever tracks peers).
//
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::{Event, OutboundEvent};

pub async fn run(mut out_rx: mpsc::Receiver<OutboundEvent>, rec_tx: mpsc::Sender<Event>) {
    while let Some(ev) = out_rx.recv().await {
        match &ev {
            OutboundEvent::Response(hb) => info!(
                reply_to = %hb.reply_to,
                from = %hb.application_id,
                interval_ms = hb.heartbeat_interval_ms,
                "HEARTBEAT OUT"
            ),
            OutboundEvent::ApplicationDisconnect(id) => warn!(app_id = %id, "APPLICATION DISCONNECT"),
        }
        let _ = rec_tx.try_send(Event::Outbound(ev));
    }
    info!("outbound: channel closed, stopped");
}

/// Installs the monitor's two listeners, both feeding `out_tx`. Returns false
/// if the monitor already had a listener in either slot.
pub fn attach(monitor: &crate::heartbeat::HeartbeatMonitor, out_tx: mpsc::Sender<OutboundEvent>) -> bool {
    let tx = out_tx.clone();
    let resp_ok = monitor.on_response(Box::new(move |hb| {
        if let Err(e) = tx.try_send(OutboundEvent::Response(hb.clone())) {
            warn!(err = %e, "outbound: response dropped");
        }
    }));
    let disc_ok = monitor.on_application_disconnect(Box::new(move |id| {
        if let Err(e) = out_tx.try_send(OutboundEvent::ApplicationDisconnect(id.to_string())) {
            warn!(err = %e, app_id = %id, "outbound: disconnect dropped");
        }
    }));
    resp_ok && disc_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Heartbeat;
    use crate::heartbeat::{HeartbeatCfg, HeartbeatMonitor};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn monitor_events_flow_to_recorder() {
        let monitor = HeartbeatMonitor::new(HeartbeatCfg {
            application_id: "trade-manager".into(),
            validation_interval: Duration::from_millis(500),
            response_interval: Duration::from_secs(60),
        })
        .unwrap();
        let (out_tx, out_rx) = mpsc::channel(8);
        let (rec_tx, mut rec_rx) = mpsc::channel(8);
        assert!(attach(&monitor, out_tx));
        assert!(!attach(&monitor, mpsc::channel(1).0));
        tokio::spawn(run(out_rx, rec_tx));

        let hb = Heartbeat { application_id: "oe-engine".into(), heartbeat_interval_ms: 500, reply_to: "oe.inbox".into() };
        monitor.update(&hb).unwrap();

        match rec_rx.recv().await {
            Some(Event::Outbound(OutboundEvent::Response(r))) => assert_eq!(r.reply_to, "oe.inbox"),
            other => panic!("unexpected {other:?}"),
        }
        match rec_rx.recv().await {
            Some(Event::Outbound(OutboundEvent::ApplicationDisconnect(id))) => assert_eq!(id, "oe-engine"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
