//! Heartbeat drivers.
//!
//! Two independent keep-alive loops, each on its own OS thread:
//!
//! - **native**: an empty opcode 0x9 ping
//! - **application**: a text frame carrying the configured ping payload,
//!   tagged as a fake heartbeat
//!
//! Neither driver touches the connection. Each heartbeat is posted to the
//! dispatcher as a [`DispatchTask::Send`](crate::events::DispatchTask) so it
//! goes through the same send path as everything else.
//!
//! # Stop flag
//!
//! Both drivers share a [`StopFlag`] with the dispatcher. While it is set
//! (disconnected) a driver that comes due resets its timer and idles a
//! whole interval instead of firing, so a reconnect is not greeted with a
//! burst of overdue pings.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::constants::HEARTBEAT_MIN_SLEEP;
use crate::events::Marshal;
use crate::message::Message;

/// Connection-down flag shared by the dispatcher and the heartbeat drivers.
///
/// Starts set: nothing is connected until the first handshake.
#[derive(Debug, Clone)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// New flag in the stopped state.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Mark the connection as down.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Mark the connection as up.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Whether the connection is down.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for StopFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// What a driver sends when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatKind {
    /// Empty native ping frame.
    Native,
    /// Text frame with this payload, tagged as a fake heartbeat.
    Application(String),
}

impl HeartbeatKind {
    fn message(&self) -> Message {
        match self {
            Self::Native => Message::ping_out(""),
            Self::Application(payload) => {
                let mut message = Message::outgoing(payload.clone());
                message.set_fake_heartbeat(true);
                message
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Application(_) => "0x1",
        }
    }
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatStep {
    /// Not due yet; sleep this long and check again.
    Sleep(Duration),
    /// Due, but the connection is down. The timer was reset.
    Idle,
    /// Due and connected: send this heartbeat.
    Fire(Message),
}

/// One heartbeat timer loop.
#[derive(Debug)]
pub struct HeartbeatDriver {
    kind: HeartbeatKind,
    interval: Duration,
    last_fired: Instant,
    stop: StopFlag,
}

impl HeartbeatDriver {
    /// Create a driver; the first heartbeat is due one interval from now.
    #[must_use]
    pub fn new(kind: HeartbeatKind, interval: Duration, stop: StopFlag) -> Self {
        Self {
            kind,
            interval,
            last_fired: Instant::now(),
            stop,
        }
    }

    /// Native ping driver, `None` when `interval_secs` is zero.
    #[must_use]
    pub fn native(interval_secs: u64, stop: StopFlag) -> Option<Self> {
        (interval_secs > 0)
            .then(|| Self::new(HeartbeatKind::Native, Duration::from_secs(interval_secs), stop))
    }

    /// Application-level driver.
    ///
    /// `None` when `interval_secs` is zero or either payload is missing.
    #[must_use]
    pub fn application(
        interval_secs: u64,
        ping_payload: Option<&str>,
        pong_payload: Option<&str>,
        stop: StopFlag,
    ) -> Option<Self> {
        match (ping_payload, pong_payload) {
            (Some(ping), Some(_)) if interval_secs > 0 => Some(Self::new(
                HeartbeatKind::Application(ping.to_string()),
                Duration::from_secs(interval_secs),
                stop,
            )),
            _ => None,
        }
    }

    /// Configured interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// What this driver sends.
    #[must_use]
    pub const fn kind(&self) -> &HeartbeatKind {
        &self.kind
    }

    /// Advance the loop to `now`.
    pub fn step(&mut self, now: Instant) -> HeartbeatStep {
        let elapsed = now.saturating_duration_since(self.last_fired);
        if elapsed < self.interval {
            return HeartbeatStep::Sleep((self.interval - elapsed).max(HEARTBEAT_MIN_SLEEP));
        }

        self.last_fired = now;
        if self.stop.is_set() {
            HeartbeatStep::Idle
        } else {
            HeartbeatStep::Fire(self.kind.message())
        }
    }

    /// Run the loop on a new OS thread.
    ///
    /// The thread exits once the dispatcher stops accepting tasks.
    pub fn spawn(mut self, marshal: Marshal) -> io::Result<JoinHandle<()>> {
        let label = self.kind.label();
        std::thread::Builder::new()
            .name(format!("heartbeat-{label}"))
            .spawn(move || {
                log::debug!(
                    "[heartbeat] Starting {label} driver with interval of {} seconds",
                    self.interval.as_secs()
                );
                loop {
                    match self.step(Instant::now()) {
                        HeartbeatStep::Sleep(duration) => {
                            if marshal.is_closed() {
                                break;
                            }
                            std::thread::sleep(duration);
                        }
                        HeartbeatStep::Idle => {
                            log::debug!("[heartbeat] {label} driver idle while disconnected");
                        }
                        HeartbeatStep::Fire(message) => {
                            if !marshal.send(message) {
                                break;
                            }
                        }
                    }
                }
                log::debug!("[heartbeat] {label} driver stopped");
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DispatchTask;
    use crate::message::FrameKind;

    fn connected() -> StopFlag {
        let stop = StopFlag::new();
        stop.clear();
        stop
    }

    #[test]
    fn test_stop_flag_starts_set() {
        let stop = StopFlag::new();
        assert!(stop.is_set());
        stop.clear();
        assert!(!stop.is_set());
        let shared = stop.clone();
        shared.set();
        assert!(stop.is_set());
    }

    #[test]
    fn test_zero_interval_disables_drivers() {
        assert!(HeartbeatDriver::native(0, StopFlag::new()).is_none());
        assert!(HeartbeatDriver::application(0, Some("p"), Some("q"), StopFlag::new()).is_none());
    }

    #[test]
    fn test_application_driver_needs_both_payloads() {
        assert!(HeartbeatDriver::application(5, Some("p"), None, StopFlag::new()).is_none());
        assert!(HeartbeatDriver::application(5, None, Some("q"), StopFlag::new()).is_none());
        assert!(HeartbeatDriver::application(5, Some("p"), Some("q"), StopFlag::new()).is_some());
    }

    #[test]
    fn test_sleeps_until_due() {
        let mut driver = HeartbeatDriver::new(HeartbeatKind::Native, Duration::from_secs(10), connected());
        let start = driver.last_fired;
        assert_eq!(
            driver.step(start + Duration::from_secs(3)),
            HeartbeatStep::Sleep(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_sleep_is_at_least_one_second() {
        let mut driver = HeartbeatDriver::new(HeartbeatKind::Native, Duration::from_secs(10), connected());
        let start = driver.last_fired;
        assert_eq!(
            driver.step(start + Duration::from_millis(9_700)),
            HeartbeatStep::Sleep(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_fires_native_ping_when_due() {
        let mut driver = HeartbeatDriver::new(HeartbeatKind::Native, Duration::from_secs(10), connected());
        let due = driver.last_fired + Duration::from_secs(10);
        match driver.step(due) {
            HeartbeatStep::Fire(message) => {
                assert_eq!(message.frame(), FrameKind::Ping);
                assert_eq!(message.payload(), "");
                assert!(!message.is_fake_heartbeat());
            }
            other => panic!("expected fire, got {other:?}"),
        }
        // Timer restarted from the fire time.
        assert_eq!(
            driver.step(due + Duration::from_secs(4)),
            HeartbeatStep::Sleep(Duration::from_secs(6))
        );
    }

    #[test]
    fn test_application_heartbeat_is_tagged_text() {
        let mut driver = HeartbeatDriver::application(1, Some("PING"), Some("PONG"), connected())
            .expect("driver enabled");
        let due = driver.last_fired + Duration::from_secs(1);
        match driver.step(due) {
            HeartbeatStep::Fire(message) => {
                assert_eq!(message.frame(), FrameKind::Text);
                assert_eq!(message.payload(), "PING");
                assert!(message.is_fake_heartbeat());
            }
            other => panic!("expected fire, got {other:?}"),
        }
    }

    #[test]
    fn test_idles_a_full_interval_while_stopped() {
        let stop = StopFlag::new();
        let mut driver = HeartbeatDriver::new(HeartbeatKind::Native, Duration::from_secs(10), stop.clone());
        let due = driver.last_fired + Duration::from_secs(25);
        assert_eq!(driver.step(due), HeartbeatStep::Idle);

        // Reconnecting right after does not produce an overdue ping.
        stop.clear();
        assert_eq!(
            driver.step(due + Duration::from_secs(1)),
            HeartbeatStep::Sleep(Duration::from_secs(9))
        );
        assert!(matches!(
            driver.step(due + Duration::from_secs(10)),
            HeartbeatStep::Fire(_)
        ));
    }

    #[test]
    fn test_spawned_driver_posts_send_tasks() {
        let (marshal, mut rx) = Marshal::channel();
        let driver = HeartbeatDriver::native(1, connected()).expect("driver enabled");
        let handle = driver.spawn(marshal).expect("spawn heartbeat thread");

        let deadline = Instant::now() + Duration::from_secs(5);
        let task = loop {
            match rx.try_recv() {
                Ok(task) => break task,
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => panic!("no heartbeat within deadline: {e}"),
            }
        };
        match task {
            DispatchTask::Send(message) => assert!(message.is_ping()),
            other => panic!("unexpected task: {other:?}"),
        }

        // Dropping the receiver stops the thread.
        drop(rx);
        handle.join().expect("heartbeat thread exits");
    }
}
