//! Cooperative Yield Control
//!
//! Long-running queue drains are chunked through an [`Idler`]: the worker
//! asks "should I pause now?" after each unit of work and suspends on
//! `idle()` when the answer is yes. The idler is an injected dependency so
//! tests can single-step a drain instead of racing wall-clock timers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Default time budget before a drain yields back to the scheduler
pub const DEFAULT_IDLE_BUDGET: Duration = Duration::from_millis(16);

// ─────────────────────────────────────────────────────────────────────────────
// Idler Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Cooperative-yield primitive for chunked work.
///
/// Callers must check `is_cancelled()` before each unit of work and abort
/// (leaving remaining work untouched) if cancelled, and check
/// `should_idle()` after each unit, awaiting `idle()` before continuing
/// when it reports true.
#[async_trait]
pub trait Idler: Send + Sync {
    /// Whether the caller should pause before the next unit of work
    fn should_idle(&self) -> bool;

    /// Suspend until the idler decides to resume
    async fn idle(&self);

    /// Mark the idler permanently cancelled
    fn cancel(&self);

    /// Whether `cancel` has been called
    fn is_cancelled(&self) -> bool;
}

// ─────────────────────────────────────────────────────────────────────────────
// Time Budget Idler
// ─────────────────────────────────────────────────────────────────────────────

/// Production idler: reports `should_idle` once elapsed time since the last
/// resume exceeds a budget; `idle()` yields to the scheduler and resets the
/// clock.
pub struct TimeBudgetIdler {
    budget: Duration,
    last_resume: Mutex<Instant>,
    cancelled: AtomicBool,
}

impl TimeBudgetIdler {
    /// Create an idler with the given time budget
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            last_resume: Mutex::new(Instant::now()),
            cancelled: AtomicBool::new(false),
        }
    }
}

impl Default for TimeBudgetIdler {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_BUDGET)
    }
}

#[async_trait]
impl Idler for TimeBudgetIdler {
    fn should_idle(&self) -> bool {
        self.last_resume.lock().elapsed() >= self.budget
    }

    async fn idle(&self) {
        tokio::task::yield_now().await;
        *self.last_resume.lock() = Instant::now();
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stepped Idler
// ─────────────────────────────────────────────────────────────────────────────

/// Externally controlled idler for deterministic tests.
///
/// `request_pause()` makes the next `should_idle()` check report true; the
/// worker then parks in `idle()` until `resume()` is called. Cancellation
/// also releases a parked worker so it can observe the flag and abort.
#[derive(Default)]
pub struct SteppedIdler {
    paused: AtomicBool,
    cancelled: AtomicBool,
    resume: Notify,
}

impl SteppedIdler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to pause at its next yield point
    pub fn request_pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Release a worker parked in `idle()`
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resume.notify_one();
    }
}

#[async_trait]
impl Idler for SteppedIdler {
    fn should_idle(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn idle(&self) {
        self.resume.notified().await;
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.resume.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
