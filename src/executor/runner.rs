//! Fault-isolated, timed execution of a single task.

use super::panic_handler::{PanicHandler, PanicInfo, PanicStrategy};
use super::task::Task;
use crate::telemetry::Metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a task run ended.
#[derive(Debug)]
pub enum Outcome {
    /// `waited` is the time spent queued before the task started.
    Completed {
        elapsed: Duration,
        waited: Duration,
        slow: bool,
    },
    Panicked(PanicInfo),
}

impl Outcome {
    pub fn is_panicked(&self) -> bool {
        matches!(self, Outcome::Panicked(_))
    }
}

/// Runs tasks one at a time with panic containment and slow-task detection.
///
/// A task runs at most once: panics are logged and the task is dropped,
/// slow tasks are logged with their label or origin and otherwise left
/// alone.
#[derive(Debug)]
pub struct TaskRunner {
    panic_handler: PanicHandler,
    slow_threshold: Duration,
    metrics: Arc<Metrics>,
}

impl TaskRunner {
    pub fn new(strategy: PanicStrategy, slow_threshold: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            panic_handler: PanicHandler::new(strategy),
            slow_threshold,
            metrics,
        }
    }

    pub fn run(&self, task: Task) -> Outcome {
        let id = task.id;
        let name = task.name().into_owned();
        let origin = task.origin;
        let waited = task.submitted_at.elapsed();
        let start = Instant::now();

        let result = self.panic_handler.execute(&name, move || task.execute());
        let elapsed = start.elapsed();

        match result {
            Ok(()) => {
                self.metrics.record_task_execution(elapsed);
                let slow = elapsed > self.slow_threshold;
                if slow {
                    self.metrics.record_slow_task();
                    tracing::warn!(
                        task = %name,
                        task_id = %id,
                        source = %origin,
                        elapsed_ms = elapsed.as_millis() as u64,
                        queued_ms = waited.as_millis() as u64,
                        threshold_ms = self.slow_threshold.as_millis() as u64,
                        "task time out"
                    );
                } else {
                    tracing::trace!(task = %name, task_id = %id, ?elapsed, ?waited, "task done");
                }
                Outcome::Completed {
                    elapsed,
                    waited,
                    slow,
                }
            }
            Err(info) => {
                self.metrics.record_task_panic();
                Outcome::Panicked(info)
            }
        }
    }

    /// Run a non-task callback (the cron hook) under the same isolation.
    pub fn run_hook<F: FnOnce()>(&self, name: &str, f: F) -> bool {
        self.panic_handler.execute(name, f).is_ok()
    }

    pub fn panic_count(&self) -> usize {
        self.panic_handler.panic_count()
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn runner(threshold: Duration) -> TaskRunner {
        TaskRunner::new(PanicStrategy::Isolate, threshold, Arc::new(Metrics::new()))
    }

    #[test]
    fn test_run_completes() {
        let runner = runner(Duration::from_secs(1));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();

        let outcome = runner.run(Task::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(matches!(outcome, Outcome::Completed { slow: false, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(runner.metrics().snapshot().tasks_executed, 1);
    }

    #[test]
    fn test_panic_is_contained() {
        let runner = runner(Duration::from_secs(1));

        let outcome = runner.run(Task::labeled("boom", || panic!("bad handler")));
        match outcome {
            Outcome::Panicked(info) => assert_eq!(info.message, "bad handler"),
            other => panic!("unexpected outcome {:?}", other),
        }

        let outcome = runner.run(Task::new(|| {}));
        assert!(!outcome.is_panicked());
        assert_eq!(runner.panic_count(), 1);
        assert_eq!(runner.metrics().snapshot().tasks_panicked, 1);
    }

    #[test]
    fn test_slow_task_flagged_not_aborted() {
        let runner = runner(Duration::from_millis(5));
        let done = Arc::new(AtomicUsize::new(0));
        let d = done.clone();

        let outcome = runner.run(Task::labeled("slow", move || {
            thread::sleep(Duration::from_millis(20));
            d.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(matches!(outcome, Outcome::Completed { slow: true, .. }));
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(runner.metrics().snapshot().tasks_slow, 1);
    }

    #[test]
    fn test_queue_wait_reported() {
        let runner = runner(Duration::from_secs(1));
        let task = Task::new(|| {});
        thread::sleep(Duration::from_millis(15));

        match runner.run(task) {
            Outcome::Completed { waited, .. } => {
                assert!(waited >= Duration::from_millis(15))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_run_hook_isolated() {
        let runner = runner(Duration::from_secs(1));
        assert!(runner.run_hook("cron", || {}));
        assert!(!runner.run_hook("cron", || panic!("cron failed")));
    }
}
