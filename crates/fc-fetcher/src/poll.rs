//! Poll interval tracking per endpoint.
//!
//! Different subscribers may request different refresh periods for the same
//! endpoint. The tracker keeps the multiset of requested intervals and runs
//! one recurring tokio task at the smallest of them, invoking the injected
//! schedule hook on every tick. Adding or removing an interval reschedules
//! the task whenever the minimum changes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

/// Hook invoked on every poll tick.
pub type PollHook = Arc<dyn Fn() + Send + Sync>;

/// The recurring task driving one endpoint's polls.
struct PollTask {
    shutdown: oneshot::Sender<()>,
}

impl PollTask {
    fn spawn(period: Duration, hook: PollHook) -> Self {
        let (shutdown, mut shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => hook(),
                }
            }
        });
        Self { shutdown }
    }

    fn cancel(self) {
        // The task may already have observed a dropped sender.
        let _ = self.shutdown.send(());
    }
}

/// Tracks the poll intervals requested for one endpoint.
///
/// The active timer always runs at `min(intervals)`. Removing the interval
/// that drove the timer reschedules at the new minimum, or cancels the
/// timer when no subscriber remains.
///
/// # Examples
///
/// ```no_run
/// use fc_fetcher::PollTracker;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let mut tracker = PollTracker::new(Arc::new(|| { /* schedule a fetch */ }));
/// tracker.add_interval(Duration::from_secs(60));
/// tracker.add_interval(Duration::from_secs(10));
/// assert_eq!(tracker.current_interval(), Some(Duration::from_secs(10)));
///
/// let remaining = tracker.remove_interval(Duration::from_secs(10));
/// assert_eq!(remaining, 1);
/// assert_eq!(tracker.current_interval(), Some(Duration::from_secs(60)));
/// ```
pub struct PollTracker {
    /// Sorted multiset of requested intervals.
    intervals: Vec<Duration>,

    /// The period the active task runs at, if any.
    current: Option<Duration>,

    /// The active recurring task.
    task: Option<PollTask>,

    /// Hook invoked on every tick.
    hook: PollHook,
}

impl PollTracker {
    /// Creates a tracker that invokes `hook` on every poll tick.
    #[must_use]
    pub fn new(hook: PollHook) -> Self {
        Self {
            intervals: Vec::new(),
            current: None,
            task: None,
            hook,
        }
    }

    /// Adds one subscriber's interval and reschedules if the minimum changed.
    pub fn add_interval(&mut self, interval: Duration) {
        let position = self.intervals.partition_point(|&i| i <= interval);
        self.intervals.insert(position, interval);
        self.resync();
    }

    /// Removes one occurrence of a previously added interval.
    ///
    /// Returns the number of subscribers still tracked, so the caller can
    /// drop the whole tracker at zero. Removing an interval that was never
    /// added indicates a caller bug: it is logged loudly and the tracker
    /// state is left unchanged.
    pub fn remove_interval(&mut self, interval: Duration) -> usize {
        match self.intervals.iter().position(|&i| i == interval) {
            Some(position) => {
                self.intervals.remove(position);
                self.resync();
            }
            None => {
                tracing::error!(
                    interval = ?interval,
                    "Attempted to remove a poll interval that was never added"
                );
            }
        }
        self.intervals.len()
    }

    /// Number of subscribers currently tracked.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.intervals.len()
    }

    /// The period the active timer runs at, if any.
    #[inline]
    #[must_use]
    pub fn current_interval(&self) -> Option<Duration> {
        self.current
    }

    /// Restarts or cancels the recurring task so it matches `min(intervals)`.
    fn resync(&mut self) {
        let minimum = self.intervals.first().copied();
        if minimum == self.current {
            return;
        }

        if let Some(task) = self.task.take() {
            task.cancel();
        }
        self.current = minimum;
        if let Some(period) = minimum {
            self.task = Some(PollTask::spawn(period, Arc::clone(&self.hook)));
        }
    }
}

impl Drop for PollTracker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel();
        }
    }
}

impl std::fmt::Debug for PollTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollTracker")
            .field("intervals", &self.intervals)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}
