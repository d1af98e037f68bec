// ===============================
// src/heartbeat.rs
// ===============================
//
// HeartbeatMonitor: one LivenessTimer per remote application ID.
// - update()     : atomic get-or-create, then re-arm the peer's countdown.
//                  A brand-new session gets one immediate response.
// - disconnect   : timer fires -> entry removed (only if it is still the
//                  same session) -> ApplicationDisconnect forwarded.
// - response     : forwarded unchanged to the transport listener.
//
// A heartbeat that loses the race against its session's disconnect opens a
// fresh session; a torn-down timer is never revived. Whoever removes a dead
// session reports it, exactly once, before a newer session for the same ID
// can answer.
//
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::{Event, Heartbeat};
use crate::liveness::LivenessTimer;
use crate::metrics::{HB_DISCONNECTS, HB_PEERS, HB_RECEIVED, HB_RESPONSES};

pub type DisconnectCallback = Box<dyn Fn(&str) + Send + Sync>;
pub type ResponseCallback = Box<dyn Fn(&Heartbeat) + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeartbeatError {
    #[error("heartbeat without application id")]
    EmptyApplicationId,
    #[error("{0} interval must be non-zero")]
    ZeroInterval(&'static str),
}

#[derive(Debug, Clone)]
pub struct HeartbeatCfg {
    /// Our own identity, stamped on every response.
    pub application_id: String,
    pub validation_interval: Duration,
    pub response_interval: Duration,
}

impl Default for HeartbeatCfg {
    fn default() -> Self {
        Self {
            application_id: "trade-manager".into(),
            validation_interval: Duration::from_millis(10_000),
            response_interval: Duration::from_millis(120_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// New session, initial response emitted.
    Registered,
    Refreshed,
}

struct Inner {
    cfg: HeartbeatCfg,
    timers: DashMap<String, Arc<LivenessTimer>>,
    sessions: AtomicU64,
    on_disconnect: OnceCell<DisconnectCallback>,
    on_response: OnceCell<ResponseCallback>,
}

#[derive(Clone)]
pub struct HeartbeatMonitor {
    inner: Arc<Inner>,
}

impl HeartbeatMonitor {
    pub fn new(cfg: HeartbeatCfg) -> Result<Self, HeartbeatError> {
        if cfg.application_id.trim().is_empty() {
            return Err(HeartbeatError::EmptyApplicationId);
        }
        if cfg.response_interval.is_zero() {
            return Err(HeartbeatError::ZeroInterval("response"));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                cfg,
                timers: DashMap::new(),
                sessions: AtomicU64::new(0),
                on_disconnect: OnceCell::new(),
                on_response: OnceCell::new(),
            }),
        })
    }

    /// Single slot. Returns false when a listener is already installed.
    ///
    /// The listener runs while the peer's registry slot is locked, so it must
    /// not call back into the monitor. Hand the ID off (channel, queue) instead.
    pub fn on_application_disconnect(&self, cb: DisconnectCallback) -> bool {
        self.inner.on_disconnect.set(cb).is_ok()
    }

    /// Single slot. Returns false when a listener is already installed.
    pub fn on_response(&self, cb: ResponseCallback) -> bool {
        self.inner.on_response.set(cb).is_ok()
    }

    pub fn update(&self, hb: &Heartbeat) -> Result<UpdateOutcome, HeartbeatError> {
        if hb.application_id.trim().is_empty() {
            return Err(HeartbeatError::EmptyApplicationId);
        }
        HB_RECEIVED.inc();
        loop {
            let (timer, created) = self.get_or_create(hb);
            if created {
                info!(app_id = %hb.application_id, session = timer.session(), interval_ms = hb.heartbeat_interval_ms, "application registered");
                self.inner.emit_response(timer.response());
            }
            if timer.update(hb.interval()) {
                return Ok(if created { UpdateOutcome::Registered } else { UpdateOutcome::Refreshed });
            }
            // lost against this session's disconnect
            debug!(app_id = %hb.application_id, session = timer.session(), "stale session, reopening");
            self.inner.retire(&hb.application_id, timer.session());
        }
    }

    #[cfg(test)]
    pub fn is_connected(&self, application_id: &str) -> bool {
        self.inner.timers.get(application_id).map(|t| t.is_active()).unwrap_or(false)
    }

    #[cfg(test)]
    pub fn session_of(&self, application_id: &str) -> Option<u64> {
        self.inner.timers.get(application_id).map(|t| t.session())
    }

    /// Live application IDs, sorted.
    pub fn connected(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .timers
            .iter()
            .filter(|e| e.value().is_active())
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize { self.inner.timers.len() }

    /// Drops every session without raising disconnects.
    pub fn shutdown(&self) {
        self.inner.timers.retain(|_, t| {
            t.stop();
            false
        });
        HB_PEERS.set(0);
        info!("heartbeat monitor stopped");
    }

    fn get_or_create(&self, hb: &Heartbeat) -> (Arc<LivenessTimer>, bool) {
        let mut created = false;
        let timer = self
            .inner
            .timers
            .entry(hb.application_id.clone())
            .or_insert_with(|| {
                created = true;
                self.new_timer(hb)
            })
            .value()
            .clone();
        if created {
            HB_PEERS.set(self.inner.timers.len() as i64);
        }
        (timer, created)
    }

    fn new_timer(&self, hb: &Heartbeat) -> Arc<LivenessTimer> {
        let cfg = &self.inner.cfg;
        let session = self.inner.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        let response = Heartbeat {
            application_id: cfg.application_id.clone(),
            heartbeat_interval_ms: cfg.response_interval.as_millis() as u64,
            reply_to: hb.reply_to.clone(),
        };
        let timer = LivenessTimer::new(
            hb.application_id.clone(),
            session,
            cfg.validation_interval,
            cfg.response_interval,
            response,
        );

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        timer.on_disconnect(Box::new(move |t| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_disconnect(t.application_id(), t.session());
            }
        }));
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        timer.on_response(Box::new(move |resp| {
            if let Some(inner) = weak.upgrade() {
                inner.emit_response(resp);
            }
        }));
        timer.start();
        timer
    }
}

impl Inner {
    fn handle_disconnect(&self, application_id: &str, session: u64) {
        if !self.retire(application_id, session) {
            debug!(app_id = %application_id, session, "disconnect already reported");
        }
    }

    /// Removes `session` if it still owns the slot and reports its
    /// disconnect. The report happens under the slot's lock, so an update
    /// for the same ID cannot open a new session until it has been delivered.
    fn retire(&self, application_id: &str, session: u64) -> bool {
        let removed = self
            .timers
            .remove_if(application_id, |_, t| {
                if t.session() != session {
                    return false;
                }
                HB_DISCONNECTS.inc();
                warn!(app_id = %application_id, session, "application disconnected");
                if let Some(cb) = self.on_disconnect.get() {
                    cb(application_id);
                }
                true
            })
            .is_some();
        if removed {
            HB_PEERS.set(self.timers.len() as i64);
        }
        removed
    }

    fn emit_response(&self, resp: &Heartbeat) {
        HB_RESPONSES.inc();
        debug!(reply_to = %resp.reply_to, "heartbeat response");
        if let Some(cb) = self.on_response.get() {
            cb(resp);
        }
    }
}

/// Transport consumer: feeds inbound heartbeats into the monitor until the
/// channel closes, then drops every session.
pub async fn run(mut hb_rx: mpsc::Receiver<Heartbeat>, monitor: HeartbeatMonitor, rec_tx: mpsc::Sender<Event>) {
    while let Some(hb) = hb_rx.recv().await {
        if let Err(e) = monitor.update(&hb) {
            warn!(err = %e, "heartbeat ignored");
            continue;
        }
        let _ = rec_tx.try_send(Event::HeartbeatIn(hb));
    }
    monitor.shutdown();
}
