//! Clocks driving the recording loop
//!
//! The recorder never sleeps directly. It asks its [`TimeSource`] to wait
//! until a deadline while watching the request channel, so the real clock
//! and the deterministic test clock share one loop.

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Request sent to a running recorder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderRequest {
    /// Capture a segment carrying this tag
    Tag(String),
    /// Finish the recording
    Stop,
}

/// Monotonic clock with an interruptible wait
pub trait TimeSource: Send {
    /// Nanoseconds since an arbitrary fixed origin
    fn current_time_nanos(&self) -> u64;

    /// Wait until `deadline_nanos` or until a request arrives
    ///
    /// Returns the request that cut the wait short, or `None` once the
    /// deadline has passed.
    fn wake_up_at(
        &self,
        deadline_nanos: u64,
        requests: &Receiver<RecorderRequest>,
    ) -> Option<RecorderRequest>;
}

/// Wall-clock time source backed by [`Instant`]
#[derive(Debug, Clone)]
pub struct SystemMonotonicTimeSource {
    origin: Instant,
}

impl SystemMonotonicTimeSource {
    /// Start a clock at zero
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemMonotonicTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemMonotonicTimeSource {
    fn current_time_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn wake_up_at(
        &self,
        deadline_nanos: u64,
        requests: &Receiver<RecorderRequest>,
    ) -> Option<RecorderRequest> {
        let now = self.current_time_nanos();
        let timeout = Duration::from_nanos(deadline_nanos.saturating_sub(now));
        match requests.recv_timeout(timeout) {
            Ok(request) => Some(request),
            Err(RecvTimeoutError::Timeout) => None,
            // Every handle is gone: nobody can send a stop any more, keep ticking
            Err(RecvTimeoutError::Disconnected) => {
                let remaining = deadline_nanos.saturating_sub(self.current_time_nanos());
                std::thread::sleep(Duration::from_nanos(remaining));
                None
            }
        }
    }
}

/// Deterministic clock for tests
///
/// Never advances on its own. A wait returns a pending request immediately,
/// or else jumps the clock straight to the deadline. Clones share the same
/// time.
#[derive(Debug, Clone, Default)]
pub struct FakeTimeSource {
    now: Arc<AtomicU64>,
}

impl FakeTimeSource {
    /// Start at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.now.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Set the clock
    pub fn set_nanos(&self, nanos: u64) {
        self.now.store(nanos, Ordering::SeqCst);
    }
}

impl TimeSource for FakeTimeSource {
    fn current_time_nanos(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn wake_up_at(
        &self,
        deadline_nanos: u64,
        requests: &Receiver<RecorderRequest>,
    ) -> Option<RecorderRequest> {
        match requests.try_recv() {
            Ok(request) => Some(request),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                self.now.fetch_max(deadline_nanos, Ordering::SeqCst);
                None
            }
        }
    }
}
