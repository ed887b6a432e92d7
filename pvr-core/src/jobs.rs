use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A unit of background maintenance work.
#[async_trait]
pub trait Job: Send + Sync {
    /// Identity of the job.  At most one job with the same name is pending.
    fn name(&self) -> &'static str;

    async fn run(&self);
}

/// Coalesces and serially executes background jobs.
///
/// The queue rejects jobs until `start()` is called.
#[derive(Clone, Default)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    // Notified when a job is submitted.
    trigger: Notify,
    // Notified when the queue becomes idle.
    idle: Notify,
}

struct State {
    pending: Vec<Box<dyn Job>>,
    stopped: bool,
    running: bool,
}

impl Default for State {
    fn default() -> Self {
        State {
            pending: vec![],
            stopped: true,
            running: false,
        }
    }
}

impl State {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && !self.running
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn start(&self) {
        self.lock_state().stopped = false;
        tracing::debug!("Started");
    }

    /// Stops the queue and discards pending jobs.
    pub fn stop(&self) {
        let discarded = {
            let mut state = self.lock_state();
            state.stopped = true;
            std::mem::take(&mut state.pending)
        };
        tracing::debug!(discarded = discarded.len(), "Stopped");
        self.inner.trigger.notify_waiters();
        self.inner.idle.notify_waiters();
    }

    /// Discards pending jobs.
    pub fn clear(&self) {
        let discarded = std::mem::take(&mut self.lock_state().pending);
        tracing::debug!(discarded = discarded.len(), "Cleared");
        self.inner.idle.notify_waiters();
    }

    /// Enqueues a job.
    ///
    /// Returns `false` if the queue has been stopped or a job with the same
    /// name is already pending.
    pub fn submit<J: Job + 'static>(&self, job: J) -> bool {
        let name = job.name();
        {
            let mut state = self.lock_state();
            if state.stopped {
                tracing::debug!(job.name = name, "Stopped, rejected");
                return false;
            }
            if state.pending.iter().any(|pending| pending.name() == name) {
                tracing::trace!(job.name = name, "Already pending");
                return false;
            }
            state.pending.push(Box::new(job));
        }
        tracing::debug!(job.name = name, "Submitted");
        self.inner.trigger.notify_one();
        true
    }

    /// Runs all jobs submitted so far in the submission order.
    ///
    /// Jobs submitted while running will be executed in the next call.
    pub async fn run_pending(&self) {
        let jobs = {
            let mut state = self.lock_state();
            if state.pending.is_empty() {
                return;
            }
            state.running = true;
            std::mem::take(&mut state.pending)
        };
        for job in jobs.iter() {
            let stopped = self.lock_state().stopped;
            if stopped {
                tracing::debug!(job.name = job.name(), "Stopped, discarded");
                continue;
            }
            let start = Instant::now();
            job.run().await;
            tracing::debug!(job.name = job.name(), elapsed = ?start.elapsed(), "Done");
        }
        let idle = {
            let mut state = self.lock_state();
            state.running = false;
            state.is_idle()
        };
        if idle {
            self.inner.idle.notify_waiters();
        }
    }

    /// Waits until a job is submitted or the timeout elapses.
    ///
    /// Returns `true` if there are pending jobs.
    pub async fn wait_for_jobs(&self, timeout: Duration) -> bool {
        if self.has_pending() {
            return true;
        }
        let _ = tokio::time::timeout(timeout, self.inner.trigger.notified()).await;
        self.has_pending()
    }

    /// Waits until the queue is drained and no job is running.
    ///
    /// Returns `false` if the timeout elapsed.
    pub async fn await_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking the state so that no notification is
            // missed.
            notified.as_mut().enable();
            if self.lock_state().is_idle() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.lock_state().is_idle();
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.lock_state().pending.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.lock_state().stopped
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// <coverage:exclude>
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct RecordJob {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Job for RecordJob {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self) {
            self.log.lock().unwrap().push(self.name);
        }
    }

    fn job(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> RecordJob {
        RecordJob {
            name,
            log: log.clone(),
        }
    }

    #[tokio::test]
    async fn test_submit_rejected_until_started() {
        let queue = JobQueue::new();
        let log = Arc::new(Mutex::new(vec![]));
        assert!(queue.is_stopped());
        assert!(!queue.submit(job("a", &log)));
        queue.start();
        assert!(queue.submit(job("a", &log)));
    }

    #[tokio::test]
    async fn test_dedup_and_order() {
        let queue = JobQueue::new();
        queue.start();
        let log = Arc::new(Mutex::new(vec![]));
        assert!(queue.submit(job("timers", &log)));
        assert!(queue.submit(job("recordings", &log)));
        assert!(!queue.submit(job("timers", &log)));
        assert!(queue.submit(job("channel-groups", &log)));

        queue.run_pending().await;
        assert_eq!(
            *log.lock().unwrap(),
            vec!["timers", "recordings", "channel-groups"]
        );
        assert!(!queue.has_pending());

        // Can be submitted again after the execution.
        assert!(queue.submit(job("timers", &log)));
        queue.run_pending().await;
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_stop_discards_pending_jobs() {
        let queue = JobQueue::new();
        queue.start();
        let log = Arc::new(Mutex::new(vec![]));
        queue.submit(job("a", &log));
        queue.submit(job("b", &log));
        queue.stop();
        queue.run_pending().await;
        assert!(log.lock().unwrap().is_empty());
        assert!(!queue.submit(job("a", &log)));
    }

    #[tokio::test]
    async fn test_clear() {
        let queue = JobQueue::new();
        queue.start();
        let log = Arc::new(Mutex::new(vec![]));
        queue.submit(job("a", &log));
        queue.clear();
        assert!(!queue.has_pending());
        assert!(queue.submit(job("a", &log)));
    }

    #[tokio::test]
    async fn test_wait_for_jobs() {
        let queue = JobQueue::new();
        queue.start();
        assert!(!queue.wait_for_jobs(Duration::from_millis(10)).await);

        let log = Arc::new(Mutex::new(vec![]));
        let handle = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_for_jobs(Duration::from_secs(10)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.submit(job("a", &log));
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_await_idle() {
        let queue = JobQueue::new();
        queue.start();
        assert!(queue.await_idle(Duration::from_millis(10)).await);

        let log = Arc::new(Mutex::new(vec![]));
        queue.submit(job("a", &log));
        assert!(!queue.await_idle(Duration::from_millis(10)).await);

        let runner = {
            let queue = queue.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                queue.run_pending().await;
            })
        };
        assert!(queue.await_idle(Duration::from_secs(10)).await);
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
        runner.await.unwrap();
    }
}
// </coverage:exclude>
