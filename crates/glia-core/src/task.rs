//! Background task plumbing: trailing debounce and cancellable periodic tasks.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Trailing-edge debounce state.
///
/// Each `schedule` pushes the deadline out to `now + delay`; the action is
/// due once the deadline passes without another `schedule`.
#[derive(Debug, Clone)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Clear the pending deadline, returning whether one was set.
    pub fn take(&mut self) -> bool {
        self.deadline.take().is_some()
    }
}

/// Handle to a spawned background task. Dropping it cancels the task.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn spawn<F>(name: &'static str, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(task = name, "Spawning background task");
        Self {
            name,
            handle: Some(tokio::spawn(fut)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(task = self.name, "Cancelling background task");
            handle.abort();
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Run `f` every `period` until the returned handle is cancelled.
///
/// The first run happens after one full period. Missed ticks are skipped
/// rather than bursted.
pub fn spawn_periodic<F>(name: &'static str, period: Duration, mut f: F) -> TaskHandle
where
    F: FnMut() + Send + 'static,
{
    TaskHandle::spawn(name, async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            f();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn debounce_trails_the_last_schedule() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(500));
        assert!(!debounce.is_pending());

        debounce.schedule(start);
        debounce.schedule(start + Duration::from_millis(300));
        assert!(!debounce.is_due(start + Duration::from_millis(500)));
        assert!(debounce.is_due(start + Duration::from_millis(800)));

        assert!(debounce.take());
        assert!(!debounce.take());
        assert!(!debounce.is_due(start + Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_task_stops_when_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let mut handle = spawn_periodic("test", Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(handle.is_finished());
    }
}
