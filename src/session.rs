use log::{debug, info};
use std::fmt;
use std::time::{Duration, Instant};

/// Scan lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanState {
    #[default]
    Idle,
    Scanning,
    Stopped,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanState::Idle => write!(f, "idle"),
            ScanState::Scanning => write!(f, "scanning"),
            ScanState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Why a scan ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    TimedOut,
    ViewExited,
}

/// Idle -> Scanning -> Stopped, with a fixed scan timeout
#[derive(Debug, Clone)]
pub struct ScanSession {
    state: ScanState,
    timeout: Duration,
    deadline: Option<Instant>,
    released: bool,
}

impl ScanSession {
    pub fn new(timeout: Duration) -> Self {
        ScanSession {
            state: ScanState::Idle,
            timeout,
            deadline: None,
            released: false,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn is_scanning(&self) -> bool {
        self.state == ScanState::Scanning
    }

    /// Whether the view has been left and subscriptions released
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// When the running scan stops on its own
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Begin a scan. Returns false if one is already running or the view is gone.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.released {
            debug!("Ignoring scan start after view exit");
            return false;
        }
        if self.state == ScanState::Scanning {
            debug!("Scan already running");
            return false;
        }

        // Stopped -> Idle is implicit
        self.state = ScanState::Scanning;
        self.deadline = Some(now + self.timeout);
        info!("Scan started, timeout {}s", self.timeout.as_secs());
        true
    }

    /// End the running scan. Returns false if nothing was scanning.
    pub fn stop(&mut self, reason: StopReason) -> bool {
        if self.state != ScanState::Scanning {
            return false;
        }
        self.state = ScanState::Stopped;
        self.deadline = None;
        info!("Scan stopped ({:?})", reason);
        true
    }

    pub fn has_timed_out(&self, now: Instant) -> bool {
        self.is_scanning() && self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Stop and mark released. Returns true only the first time.
    pub fn release(&mut self) -> bool {
        self.stop(StopReason::ViewExited);
        if self.released {
            return false;
        }
        self.released = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut session = ScanSession::new(Duration::from_secs(15));
        let now = Instant::now();
        assert_eq!(session.state(), ScanState::Idle);

        assert!(session.start(now));
        assert!(!session.start(now));
        assert_eq!(session.deadline(), Some(now + Duration::from_secs(15)));

        assert!(session.stop(StopReason::Requested));
        assert_eq!(session.state(), ScanState::Stopped);
        assert!(session.deadline().is_none());
        assert!(!session.stop(StopReason::Requested));

        // Restart from Stopped
        assert!(session.start(now));
        assert!(session.is_scanning());
    }

    #[test]
    fn test_timeout() {
        let mut session = ScanSession::new(Duration::from_secs(15));
        let now = Instant::now();
        assert!(!session.has_timed_out(now));

        session.start(now);
        assert!(!session.has_timed_out(now + Duration::from_secs(14)));
        assert!(session.has_timed_out(now + Duration::from_secs(15)));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut session = ScanSession::new(Duration::from_secs(15));
        // Releasing before anything started is fine
        assert!(session.release());
        assert!(!session.release());
        assert!(session.is_released());
        assert!(!session.start(Instant::now()));
    }

    #[test]
    fn test_release_stops_scan() {
        let mut session = ScanSession::new(Duration::from_secs(15));
        session.start(Instant::now());
        assert!(session.release());
        assert_eq!(session.state(), ScanState::Stopped);
    }
}
