// File: testing-framework/src/orchestrator/clock.rs
//
// Clock Abstraction
//
// Every barrier in the harness sleeps and measures elapsed time through this
// trait, so scenarios can run against real nodes on wall-clock time or
// against the simulated network on paused tokio time.

use std::future::Future;
use std::pin::Pin;
use tokio::time::{self, Duration, Instant};

/// Time source injected into barriers and the simulated network
///
/// # Examples
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use tokio::time::Duration;
/// use minerid_testing_framework::orchestrator::{Clock, PausedClock};
///
/// #[tokio::test(start_paused = true)]
/// async fn test_with_paused_time() {
///     let clock = Arc::new(PausedClock::new());
///     let start = clock.now();
///     clock.advance(Duration::from_secs(30)).await;
///     assert_eq!(clock.now() - start, Duration::from_secs(30));
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Current instant on this clock
    fn now(&self) -> Instant;

    /// Suspend the calling task for `d`
    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Wall-clock time, used when driving real nodes
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

/// Clock over paused tokio time
///
/// Construct it inside `#[tokio::test(start_paused = true)]`. The runtime
/// then auto-advances through every sleep once all tasks are idle, so
/// barrier backoff and propagation delays cost no real time.
///
/// Construction does not pause the runtime itself, because pausing twice
/// panics. Call [`PausedClock::pause_runtime`] when the test attribute does
/// not already pause time.
#[derive(Default)]
pub struct PausedClock;

impl PausedClock {
    pub fn new() -> Self {
        Self
    }

    /// Pause tokio time on the current runtime and return a clock over it
    pub fn pause_runtime() -> Self {
        time::pause();
        Self
    }

    /// Move paused time forward by `d`, waking expired sleeps
    pub async fn advance(&self, d: Duration) {
        time::advance(d).await
    }
}

impl Clock for PausedClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}
