// ===============================
// src/liveness.rs
// ===============================
//
// Per-peer liveness timer. Two independent countdowns:
// - disconnect : deadline = last update + declared interval + validation grace.
//                Elapsing once is final (Active -> Disconnected), no retry.
// - response   : fixed period, emits our own heartbeat towards the peer.
//
// Both run as tokio tasks holding a Weak back-reference, so dropping the
// timer also ends them. State transitions are serialized by one mutex;
// listeners are always called with that mutex released.
//
use std::sync::{Arc, Weak};
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::domain::Heartbeat;

pub type TimerDisconnectFn = Box<dyn Fn(&LivenessTimer) + Send + Sync>;
pub type TimerResponseFn = Box<dyn Fn(&Heartbeat) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase { Active, Disconnected }

struct TimerState {
    phase: Phase,
    // bumped on every update; a countdown only fires for its own generation
    generation: u64,
    disconnect_task: Option<JoinHandle<()>>,
    response_task: Option<JoinHandle<()>>,
}

pub struct LivenessTimer {
    application_id: String,
    session: u64,
    validation_interval: Duration,
    response_interval: Duration,
    response: Heartbeat,
    state: Mutex<TimerState>,
    on_disconnect: OnceCell<TimerDisconnectFn>,
    on_response: OnceCell<TimerResponseFn>,
}

impl LivenessTimer {
    pub fn new(
        application_id: impl Into<String>,
        session: u64,
        validation_interval: Duration,
        response_interval: Duration,
        response: Heartbeat,
    ) -> Arc<Self> {
        Arc::new(Self {
            application_id: application_id.into(),
            session,
            validation_interval,
            response_interval,
            response,
            state: Mutex::new(TimerState {
                phase: Phase::Active,
                generation: 0,
                disconnect_task: None,
                response_task: None,
            }),
            on_disconnect: OnceCell::new(),
            on_response: OnceCell::new(),
        })
    }

    pub fn application_id(&self) -> &str { &self.application_id }
    pub fn session(&self) -> u64 { self.session }
    pub fn response(&self) -> &Heartbeat { &self.response }
    pub fn phase(&self) -> Phase { self.state.lock().phase }
    pub fn is_active(&self) -> bool { self.phase() == Phase::Active }

    /// Single slot. Returns false when a listener is already installed.
    pub fn on_disconnect(&self, cb: TimerDisconnectFn) -> bool { self.on_disconnect.set(cb).is_ok() }

    /// Single slot. Returns false when a listener is already installed.
    pub fn on_response(&self, cb: TimerResponseFn) -> bool { self.on_response.set(cb).is_ok() }

    /// Starts the periodic response countdown. Idempotent while active.
    pub fn start(self: &Arc<Self>) {
        let mut st = self.state.lock();
        if st.phase == Phase::Disconnected || st.response_task.is_some() {
            return;
        }
        let period = self.response_interval.max(Duration::from_millis(1));
        let weak: Weak<Self> = Arc::downgrade(self);
        st.response_task = Some(tokio::spawn(async move {
            let mut tick = time::interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let Some(timer) = weak.upgrade() else { break };
                if !timer.respond() {
                    break;
                }
            }
        }));
    }

    /// Restarts the disconnect countdown from now. Returns false (and does
    /// nothing) once the timer has been torn down.
    pub fn update(self: &Arc<Self>, declared_interval: Duration) -> bool {
        let mut st = self.state.lock();
        if st.phase == Phase::Disconnected {
            debug!(app_id = %self.application_id, session = self.session, "update on torn-down timer ignored");
            return false;
        }
        st.generation += 1;
        let generation = st.generation;
        let deadline = Instant::now() + declared_interval + self.validation_interval;
        if let Some(old) = st.disconnect_task.take() {
            old.abort();
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        st.disconnect_task = Some(tokio::spawn(async move {
            time::sleep_until(deadline).await;
            if let Some(timer) = weak.upgrade() {
                timer.expire(generation);
            }
        }));
        true
    }

    /// Tears the timer down without raising a disconnect.
    pub fn stop(&self) {
        let mut st = self.state.lock();
        st.phase = Phase::Disconnected;
        abort_all(&mut st);
    }

    fn expire(&self, generation: u64) {
        {
            let mut st = self.state.lock();
            // a concurrent update already re-armed the countdown
            if st.phase == Phase::Disconnected || st.generation != generation {
                return;
            }
            st.phase = Phase::Disconnected;
            // this is the running task itself; dropping the handle does not abort it
            st.disconnect_task = None;
            if let Some(resp) = st.response_task.take() {
                resp.abort();
            }
        }
        info!(app_id = %self.application_id, session = self.session, "validation window elapsed, peer presumed dead");
        if let Some(cb) = self.on_disconnect.get() {
            cb(self);
        }
    }

    fn respond(&self) -> bool {
        if !self.is_active() {
            return false;
        }
        // lock released: the listener may call back into the monitor
        if let Some(cb) = self.on_response.get() {
            cb(&self.response);
        }
        true
    }
}

fn abort_all(st: &mut TimerState) {
    if let Some(h) = st.disconnect_task.take() {
        h.abort();
    }
    if let Some(h) = st.response_task.take() {
        h.abort();
    }
}

impl Drop for LivenessTimer {
    fn drop(&mut self) {
        abort_all(self.state.get_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn timer(validation_ms: u64, response_ms: u64) -> Arc<LivenessTimer> {
        let response = Heartbeat {
            application_id: "trade-manager".into(),
            heartbeat_interval_ms: response_ms,
            reply_to: "peer-a.inbox".into(),
        };
        LivenessTimer::new(
            "peer-a",
            1,
            Duration::from_millis(validation_ms),
            Duration::from_millis(response_ms),
            response,
        )
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let c = Arc::new(AtomicUsize::new(0));
        (c.clone(), c)
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_fires_once_after_validation_window() {
        let t = timer(10_000, 120_000);
        let (fired, f) = counter();
        assert!(t.on_disconnect(Box::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        })));
        t.start();
        assert!(t.update(Duration::from_secs(5)));

        time::sleep(Duration::from_millis(14_990)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(t.is_active());

        time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(t.phase(), Phase::Disconnected);

        // no resurrection
        assert!(!t.update(Duration::from_secs(5)));
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn update_pushes_deadline_out() {
        let t = timer(1_000, 120_000);
        let (fired, f) = counter();
        t.on_disconnect(Box::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        t.update(Duration::from_secs(2));

        for _ in 0..5 {
            time::sleep(Duration::from_millis(2_500)).await;
            assert!(t.update(Duration::from_secs(2)));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(3_100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn responses_are_periodic_and_stop_on_disconnect() {
        let t = timer(500, 1_000);
        let (sent, s) = counter();
        assert!(t.on_response(Box::new(move |hb| {
            assert_eq!(hb.reply_to, "peer-a.inbox");
            s.fetch_add(1, Ordering::SeqCst);
        })));
        t.start();
        t.update(Duration::from_millis(3_000));

        time::sleep(Duration::from_millis(3_200)).await;
        assert_eq!(sent.load(Ordering::SeqCst), 3);

        // deadline at 3.5s
        time::sleep(Duration::from_secs(10)).await;
        assert!(!t.is_active());
        assert_eq!(sent.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn response_listener_can_inspect_its_timer() {
        let t = timer(60_000, 1_000);
        let weak = Arc::downgrade(&t);
        let (sent, s) = counter();
        t.on_response(Box::new(move |_| {
            // takes the state lock from inside the listener
            if weak.upgrade().is_some_and(|t| t.is_active()) {
                s.fetch_add(1, Ordering::SeqCst);
            }
        }));
        t.start();
        t.update(Duration::from_secs(60));

        time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_tears_down_silently() {
        let t = timer(100, 100);
        let (fired, f) = counter();
        let (sent, s) = counter();
        t.on_disconnect(Box::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        t.on_response(Box::new(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        }));
        t.start();
        t.update(Duration::from_millis(100));
        t.stop();

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(sent.load(Ordering::SeqCst), 0);
        assert!(!t.update(Duration::from_millis(100)));
    }

    #[test]
    fn listener_slots_accept_one_subscriber() {
        let t = timer(100, 100);
        assert!(t.on_disconnect(Box::new(|_| {})));
        assert!(!t.on_disconnect(Box::new(|_| {})));
        assert!(t.on_response(Box::new(|_| {})));
        assert!(!t.on_response(Box::new(|_| {})));
    }
}
