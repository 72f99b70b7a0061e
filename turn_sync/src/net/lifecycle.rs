//! Socket and timer bookkeeping for one game session.
//!
//! [`Lifecycle`] knows nothing about transports; the connection task reports
//! opens and closes into it and polls it for what to do next. Keeping the
//! bookkeeping separate from I/O lets the single-socket and single-timer
//! guarantees be checked without a network.

use tokio::time::{Duration, Instant};

/// Identifier of one accepted socket, unique within a session.
pub type SocketId = u64;

/// Work the connection task should perform now.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleAction {
    /// Open a new socket.
    Connect,
    /// Send a heartbeat on the live socket.
    Heartbeat,
}

#[derive(Debug)]
pub struct Lifecycle {
    heartbeat_interval: Duration,
    reconnect_delay: Duration,
    socket: Option<SocketId>,
    next_socket: SocketId,
    heartbeat_due: Option<Instant>,
    reconnect_at: Option<Instant>,
    connecting: bool,
    torn_down: bool,
    /// Consecutive closes without a successful open.
    failures: u32,
    /// Sockets opened so far, including the first.
    opened: u32,
}

impl Lifecycle {
    /// The first connect is due immediately.
    pub fn new(heartbeat_interval: Duration, reconnect_delay: Duration, now: Instant) -> Self {
        Self {
            heartbeat_interval,
            reconnect_delay,
            socket: None,
            next_socket: 1,
            heartbeat_due: None,
            reconnect_at: Some(now),
            connecting: false,
            torn_down: false,
            failures: 0,
            opened: 0,
        }
    }

    /// Record a successful open.
    ///
    /// Cancels any pending reconnect. If a socket was already live it is
    /// returned so the caller can close it; only the new one stays live.
    pub fn on_open(&mut self, now: Instant) -> (SocketId, Option<SocketId>) {
        let id = self.next_socket;
        self.next_socket += 1;
        let replaced = self.socket.replace(id);
        self.reconnect_at = None;
        self.connecting = false;
        self.heartbeat_due = Some(now + self.heartbeat_interval);
        self.failures = 0;
        self.opened += 1;
        (id, replaced)
    }

    /// Record a close or a failed connect attempt.
    ///
    /// Schedules exactly one reconnect unless one is already pending or the
    /// session was torn down. A close for a socket that is no longer live is
    /// ignored.
    pub fn on_close(&mut self, socket: Option<SocketId>, now: Instant) {
        if socket.is_some() && socket != self.socket {
            return;
        }
        self.socket = None;
        self.connecting = false;
        self.heartbeat_due = None;
        self.failures = self.failures.saturating_add(1);
        if !self.torn_down && self.reconnect_at.is_none() {
            self.reconnect_at = Some(now + self.reconnect_delay);
        }
    }

    /// Cancel every timer and never reconnect again.
    ///
    /// Returns the live socket, if any, so the caller can close it.
    pub fn teardown(&mut self) -> Option<SocketId> {
        self.torn_down = true;
        self.reconnect_at = None;
        self.heartbeat_due = None;
        self.connecting = false;
        self.socket.take()
    }

    /// Action due at `now`, if any. Timers fire at most once per poll.
    pub fn poll(&mut self, now: Instant) -> Option<LifecycleAction> {
        if self.torn_down {
            return None;
        }
        let reconnect_due = self.reconnect_at.is_some_and(|at| at <= now);
        if reconnect_due && self.socket.is_none() && !self.connecting {
            self.reconnect_at = None;
            self.connecting = true;
            return Some(LifecycleAction::Connect);
        }
        let heartbeat_due = self.heartbeat_due.is_some_and(|due| due <= now);
        if heartbeat_due && self.socket.is_some() {
            self.heartbeat_due = Some(now + self.heartbeat_interval);
            return Some(LifecycleAction::Heartbeat);
        }
        None
    }

    /// Earliest instant at which [`Lifecycle::poll`] may return an action.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.torn_down {
            return None;
        }
        match (self.reconnect_at, self.heartbeat_due) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn live_socket(&self) -> Option<SocketId> {
        self.socket
    }

    pub fn live_sockets(&self) -> usize {
        usize::from(self.socket.is_some())
    }

    pub fn pending_reconnects(&self) -> usize {
        usize::from(self.reconnect_at.is_some())
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether the next open re-establishes a dropped session.
    pub fn is_reconnect(&self) -> bool {
        self.opened > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEARTBEAT: Duration = Duration::from_secs(15);
    const RECONNECT: Duration = Duration::from_secs(3);

    fn lifecycle(now: Instant) -> Lifecycle {
        Lifecycle::new(HEARTBEAT, RECONNECT, now)
    }

    // === Connect Tests ===

    #[test]
    fn test_first_connect_is_immediate() {
        let now = Instant::now();
        let mut lc = lifecycle(now);
        assert_eq!(lc.poll(now), Some(LifecycleAction::Connect));
        // Only one attempt in flight at a time
        assert_eq!(lc.poll(now), None);
        assert!(!lc.is_reconnect());
    }

    #[test]
    fn test_open_cancels_pending_reconnect() {
        let now = Instant::now();
        let mut lc = lifecycle(now);
        lc.poll(now);
        let (id, _) = lc.on_open(now);
        lc.on_close(Some(id), now);
        assert_eq!(lc.pending_reconnects(), 1);
        lc.on_open(now);
        assert_eq!(lc.pending_reconnects(), 0);
        assert_eq!(lc.live_sockets(), 1);
    }

    #[test]
    fn test_open_replaces_live_socket() {
        let now = Instant::now();
        let mut lc = lifecycle(now);
        let (first, replaced) = lc.on_open(now);
        assert_eq!(replaced, None);
        let (second, replaced) = lc.on_open(now);
        assert_eq!(replaced, Some(first));
        assert_eq!(lc.live_socket(), Some(second));
    }

    // === Reconnect Tests ===

    #[test]
    fn test_close_schedules_single_reconnect() {
        let now = Instant::now();
        let mut lc = lifecycle(now);
        lc.poll(now);
        let (id, _) = lc.on_open(now);
        lc.on_close(Some(id), now);
        lc.on_close(None, now + Duration::from_secs(1));
        assert_eq!(lc.pending_reconnects(), 1);
        assert_eq!(lc.next_deadline(), Some(now + RECONNECT));
        assert_eq!(lc.poll(now + Duration::from_secs(2)), None);
        assert_eq!(
            lc.poll(now + RECONNECT),
            Some(LifecycleAction::Connect)
        );
        assert!(lc.is_reconnect());
    }

    #[test]
    fn test_stale_close_is_ignored() {
        let now = Instant::now();
        let mut lc = lifecycle(now);
        let (old, _) = lc.on_open(now);
        lc.on_open(now);
        lc.on_close(Some(old), now);
        assert_eq!(lc.live_sockets(), 1);
        assert_eq!(lc.pending_reconnects(), 0);
    }

    #[test]
    fn test_rapid_cycles_keep_single_socket_and_timer() {
        let start = Instant::now();
        let mut lc = lifecycle(start);
        for i in 0..10u64 {
            let now = start + Duration::from_millis(i * 10);
            let (id, _) = lc.on_open(now);
            assert!(lc.live_sockets() <= 1);
            assert!(lc.pending_reconnects() <= 1);
            lc.on_close(Some(id), now);
            assert_eq!(lc.live_sockets(), 0);
            assert!(lc.pending_reconnects() <= 1);
        }
        assert_eq!(lc.failures(), 1);
    }

    // === Heartbeat Tests ===

    #[test]
    fn test_heartbeat_interval() {
        let now = Instant::now();
        let mut lc = lifecycle(now);
        lc.poll(now);
        lc.on_open(now);
        assert_eq!(lc.poll(now + Duration::from_secs(14)), None);
        assert_eq!(
            lc.poll(now + HEARTBEAT),
            Some(LifecycleAction::Heartbeat)
        );
        assert_eq!(lc.next_deadline(), Some(now + HEARTBEAT * 2));
    }

    // === Teardown Tests ===

    #[test]
    fn test_teardown_never_reconnects() {
        let now = Instant::now();
        let mut lc = lifecycle(now);
        let (id, _) = lc.on_open(now);
        assert_eq!(lc.teardown(), Some(id));
        lc.on_close(None, now);
        assert_eq!(lc.pending_reconnects(), 0);
        assert_eq!(lc.next_deadline(), None);
        assert_eq!(lc.poll(now + Duration::from_secs(60)), None);
    }
}
