//! Inactivity timer
//!
//! [`cancel_after_inactivity`] derives a child [`CancellationToken`] that is
//! cancelled once no activity has been recorded for the idle timeout, or when
//! the parent token is cancelled. Relay loops call [`ActivityTimer::update`]
//! after every chunk they move.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Deadline used when the configured timeout does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

struct TimerState {
    started: Instant,
    timeout: Duration,
    /// Milliseconds since `started` of the latest activity
    last_activity_ms: AtomicU64,
    expired: AtomicBool,
}

impl TimerState {
    fn deadline(&self) -> Instant {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Acquire));
        self.started
            .checked_add(last)
            .and_then(|at| at.checked_add(self.timeout))
            .unwrap_or_else(|| Instant::now() + FAR_FUTURE)
    }

    fn touch(&self) {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        // fetch_max keeps the stamp monotonic when both directions race
        self.last_activity_ms.fetch_max(elapsed, Ordering::AcqRel);
    }
}

/// Activity tracker backing an inactivity-cancelled token
///
/// The watchdog task is aborted when the timer is dropped, so the owner must
/// keep the timer alive for as long as the token should be policed.
pub struct ActivityTimer {
    state: Arc<TimerState>,
    token: CancellationToken,
    watchdog: JoinHandle<()>,
}

impl ActivityTimer {
    /// Record activity, pushing the deadline forward
    pub fn update(&self) {
        self.state.touch();
    }

    /// Whether the watchdog cancelled the token for inactivity
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.state.expired.load(Ordering::Acquire)
    }

    /// Configured idle timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.state.timeout
    }

    /// Time since the last recorded activity
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.state.last_activity_ms.load(Ordering::Acquire));
        self.state.started.elapsed().saturating_sub(last)
    }

    /// The token policed by this timer
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ActivityTimer {
    fn drop(&mut self) {
        self.watchdog.abort();
    }
}

impl std::fmt::Debug for ActivityTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityTimer")
            .field("timeout", &self.state.timeout)
            .field("idle_for", &self.idle_for())
            .field("expired", &self.is_expired())
            .finish()
    }
}

/// Derive a token from `parent` that is cancelled after `timeout` without
/// activity.
///
/// Must be called from within a tokio runtime; the watchdog is spawned onto it.
pub fn cancel_after_inactivity(
    parent: &CancellationToken,
    timeout: Duration,
) -> (CancellationToken, Arc<ActivityTimer>) {
    let token = parent.child_token();
    let state = Arc::new(TimerState {
        started: Instant::now(),
        timeout,
        last_activity_ms: AtomicU64::new(0),
        expired: AtomicBool::new(false),
    });

    let watchdog = tokio::spawn(watch(Arc::clone(&state), token.clone()));

    let timer = Arc::new(ActivityTimer {
        state,
        token: token.clone(),
        watchdog,
    });
    (token, timer)
}

async fn watch(state: Arc<TimerState>, token: CancellationToken) {
    loop {
        let deadline = state.deadline();
        tokio::select! {
            () = token.cancelled() => return,
            () = sleep_until(deadline) => {}
        }

        if Instant::now() >= state.deadline() {
            state.expired.store(true, Ordering::Release);
            debug!(
                "No activity for {}s, cancelling connection",
                state.timeout.as_secs()
            );
            token.cancel();
            return;
        }
    }
}
