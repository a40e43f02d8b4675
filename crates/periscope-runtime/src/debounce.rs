//! Debounced Flush Timer
//!
//! An explicit timer-owning object replacing the usual closure-captured
//! debounce helper. Invariants: at most one pending timer exists, and the
//! flush callback always observes the latest accumulated state at the time
//! it runs.
//!
//! Edge behavior: the first `schedule()` of a burst opens a window and
//! fires the callback as soon as the scheduler runs it (leading edge, so
//! the first message of a burst is visible immediately); calls arriving
//! inside the window coalesce into a single trailing fire after the quiet
//! period.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Default quiet period between a burst and its trailing flush
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(200);

type Callback = Box<dyn Fn() + Send + Sync>;

struct DebounceState {
    timer: Option<JoinHandle<()>>,
    pending: bool,
}

struct DebounceInner {
    quiet: Duration,
    callback: Callback,
    state: Mutex<DebounceState>,
}

/// Timer-owning leading/trailing debouncer.
///
/// Must be created inside a tokio runtime; the window timer is a spawned
/// task.
pub struct Debouncer {
    inner: Arc<DebounceInner>,
}

impl Debouncer {
    /// Create a debouncer invoking `callback` on each flush
    pub fn new(quiet: Duration, callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(DebounceInner {
                quiet,
                callback: Box::new(callback),
                state: Mutex::new(DebounceState {
                    timer: None,
                    pending: false,
                }),
            }),
        }
    }

    /// Request a flush.
    ///
    /// Opens a window (leading-edge fire) if none is active; otherwise
    /// marks the window pending so the trailing edge fires once the quiet
    /// period elapses.
    pub fn schedule(&self) {
        let mut state = self.inner.state.lock();
        if state.timer.is_some() {
            state.pending = true;
            return;
        }
        state.pending = true;
        state.timer = Some(Self::spawn_window(&self.inner));
    }

    fn spawn_window(inner: &Arc<DebounceInner>) -> JoinHandle<()> {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            // Leading edge: consume everything accumulated up to the point
            // this task actually runs.
            inner.state.lock().pending = false;
            (inner.callback)();

            loop {
                tokio::time::sleep(inner.quiet).await;
                let fire = {
                    let mut state = inner.state.lock();
                    if state.pending {
                        state.pending = false;
                        true
                    } else {
                        state.timer = None;
                        return;
                    }
                };
                if fire {
                    (inner.callback)();
                }
            }
        })
    }

    /// Cancel any pending timer and flush immediately
    pub fn flush_now(&self) {
        {
            let mut state = self.inner.state.lock();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.pending = false;
        }
        (self.inner.callback)();
    }

    /// Cancel any pending timer without flushing
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.pending = false;
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_debouncer(quiet: Duration) -> (Debouncer, Arc<AtomicUsize>) {
        let fires = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fires);
        let debouncer = Debouncer::new(quiet, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (debouncer, fires)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_fire() {
        let (debouncer, fires) = counting_debouncer(Duration::from_millis(200));

        // A synchronous burst is consumed entirely by the leading fire.
        for _ in 0..5 {
            debouncer.schedule();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_fire_after_quiet_period() {
        let (debouncer, fires) = counting_debouncer(Duration::from_millis(200));

        debouncer.schedule();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);

        // Arrives inside the window: coalesced into one trailing fire.
        debouncer.schedule();
        debouncer.schedule();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_window_closes() {
        let (debouncer, fires) = counting_debouncer(Duration::from_millis(200));

        debouncer.schedule();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);

        // A fresh burst after the window closed fires its own leading edge.
        debouncer.schedule();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_now_preempts_timer() {
        let (debouncer, fires) = counting_debouncer(Duration::from_millis(200));

        debouncer.schedule();
        tokio::time::sleep(Duration::from_millis(50)).await;
        debouncer.schedule();
        debouncer.flush_now();
        assert_eq!(fires.load(Ordering::SeqCst), 2);

        // The aborted timer must not fire a third time.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_suppresses_trailing_fire() {
        let (debouncer, fires) = counting_debouncer(Duration::from_millis(200));

        debouncer.schedule();
        tokio::time::sleep(Duration::from_millis(50)).await;
        debouncer.schedule();
        debouncer.cancel();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }
}
