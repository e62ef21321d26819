//! Delay Engine
//!
//! Millisecond waits for the playback loop. [`BusyWaitDelay`] actively polls
//! the monotonic clock rather than sleeping: the target boards have no
//! scheduler with bounded wake-up latency, so spinning gives tighter note
//! timing at the cost of CPU. [`VirtualDelay`] advances a shared clock
//! instantly and is used for tests, dry runs, and rendering.
//!
//! Every wait checks a [`CancelToken`] on each poll, so a controller thread
//! can interrupt a song between polls.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full duration elapsed
    Elapsed,
    /// The cancel token was raised mid-wait
    Cancelled,
}

/// Cooperative cancellation flag shared between the player and a controller
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// New, unraised token
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the player to stop at the next poll
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Lower the flag so the token can be reused for the next song
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Blocking millisecond wait
pub trait Delay {
    /// Block for at least `ms` milliseconds, or until `cancel` is raised
    fn wait(&mut self, ms: u32, cancel: &CancelToken) -> WaitOutcome;
}

impl<D: Delay + ?Sized> Delay for &mut D {
    fn wait(&mut self, ms: u32, cancel: &CancelToken) -> WaitOutcome {
        (**self).wait(ms, cancel)
    }
}

impl<D: Delay + ?Sized> Delay for Box<D> {
    fn wait(&mut self, ms: u32, cancel: &CancelToken) -> WaitOutcome {
        (**self).wait(ms, cancel)
    }
}

/// Spin on [`Instant`] until the deadline passes
#[derive(Debug, Clone, Copy, Default)]
pub struct BusyWaitDelay;

impl BusyWaitDelay {
    /// Create a busy-wait delay
    pub fn new() -> Self {
        BusyWaitDelay
    }
}

impl Delay for BusyWaitDelay {
    fn wait(&mut self, ms: u32, cancel: &CancelToken) -> WaitOutcome {
        let target = Duration::from_millis(u64::from(ms));
        let start = Instant::now();

        while start.elapsed() < target {
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }
            std::hint::spin_loop();
        }
        WaitOutcome::Elapsed
    }
}

/// Shared millisecond counter for virtual time
#[derive(Debug, Clone, Default)]
pub struct VirtualClock(Arc<AtomicU64>);

impl VirtualClock {
    /// Clock at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Move the clock forward
    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::AcqRel);
    }
}

/// Delay that advances a [`VirtualClock`] without blocking
#[derive(Debug, Clone, Default)]
pub struct VirtualDelay {
    clock: VirtualClock,
    requested: Vec<u32>,
}

impl VirtualDelay {
    /// Delay driving its own fresh clock
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay driving an existing clock (e.g. one shared with a backend)
    pub fn with_clock(clock: VirtualClock) -> Self {
        VirtualDelay {
            clock,
            requested: Vec::new(),
        }
    }

    /// The clock this delay advances
    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// Every wait requested so far, in milliseconds
    pub fn requested(&self) -> &[u32] {
        &self.requested
    }

    /// Sum of all waits requested so far
    pub fn total_ms(&self) -> u64 {
        self.requested.iter().map(|&ms| u64::from(ms)).sum()
    }
}

impl Delay for VirtualDelay {
    fn wait(&mut self, ms: u32, cancel: &CancelToken) -> WaitOutcome {
        if cancel.is_cancelled() {
            return WaitOutcome::Cancelled;
        }
        self.requested.push(ms);
        self.clock.advance(u64::from(ms));
        WaitOutcome::Elapsed
    }
}
