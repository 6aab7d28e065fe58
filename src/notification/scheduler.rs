//! Cancellable timer-driven tasks

use std::future::Future;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Shortest period accepted by [`ScheduledTask::every`]
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A spawned timer task with an explicit cancel handle.
///
/// Dropping a `ScheduledTask` does not cancel the work; call [`ScheduledTask::cancel`].
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    handle: AbortHandle,
}

impl ScheduledTask {
    /// Run `work` once after `delay`. Must be called within a tokio runtime.
    pub fn after<Fut>(delay: Duration, work: Fut) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            work.await;
        });
        Self {
            handle: handle.abort_handle(),
        }
    }

    /// Run `tick` every `period`, first after one full period.
    /// Each tick completes before the next one is scheduled. Periods below [`MIN_PERIOD`]
    /// are raised to it.
    pub fn every<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                tick().await;
            }
        });
        Self {
            handle: handle.abort_handle(),
        }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// True once the task ran to completion or was cancelled
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
