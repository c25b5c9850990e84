//! A dedicated consumer thread for one [`TaskBuffer`](super::TaskBuffer).

use super::task_buffer::BufferReceiver;
use crate::config::Config;
use crate::error::Result;
use crate::executor::TaskRunner;
use crate::telemetry::{Metrics, MetricsSnapshot};
use crossbeam_channel::{bounded, select, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// What happens to tasks still pending when a worker shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TeardownPolicy {
    /// Run everything still queued or spilled before exiting.
    Flush,
    /// Drop pending tasks unrun.
    #[default]
    Discard,
}

/// Drains a buffer on its own thread, one task at a time, with the same
/// panic containment and slow-task reporting as the dispatch loop.
///
/// Dropping the worker stops it with [`TeardownPolicy::Discard`].
pub struct BufferWorker {
    name: String,
    shutdown: Option<Sender<TeardownPolicy>>,
    thread: Option<JoinHandle<usize>>,
    metrics: Arc<Metrics>,
}

impl BufferWorker {
    pub fn spawn<S: Into<String>>(
        name: S,
        receiver: BufferReceiver,
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;
        let name = name.into();
        let metrics = Arc::new(Metrics::new());
        let runner = TaskRunner::new(
            config.panic_strategy,
            config.slow_task_threshold,
            metrics.clone(),
        );
        let (shutdown_tx, shutdown_rx) = bounded::<TeardownPolicy>(1);

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let policy = loop {
                    // Shutdown wins over queued work.
                    if let Ok(policy) = shutdown_rx.try_recv() {
                        break policy;
                    }
                    select! {
                        recv(receiver.channel()) -> task => match task {
                            Ok(task) => {
                                runner.run(receiver.take(task));
                            }
                            Err(_) => break TeardownPolicy::Discard,
                        },
                        recv(shutdown_rx) -> policy => break policy.unwrap_or_default(),
                    }
                };
                let flushed = match policy {
                    TeardownPolicy::Flush => receiver.flush(&runner),
                    TeardownPolicy::Discard => 0,
                };
                tracing::debug!(?policy, flushed, "buffer worker exiting");
                flushed
            })?;

        Ok(Self {
            name,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
            metrics,
        })
    }

    /// Stop the worker and wait for it. Returns how many tasks were flushed.
    pub fn shutdown(mut self, policy: TeardownPolicy) -> usize {
        self.stop(policy)
    }

    fn stop(&mut self, policy: TeardownPolicy) -> usize {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.try_send(policy);
        }
        match self.thread.take() {
            Some(thread) => match thread.join() {
                Ok(flushed) => flushed,
                Err(_) => {
                    tracing::error!(worker = %self.name, "buffer worker thread panicked");
                    0
                }
            },
            None => 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for BufferWorker {
    fn drop(&mut self) {
        self.stop(TeardownPolicy::Discard);
    }
}

impl std::fmt::Debug for BufferWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferWorker")
            .field("name", &self.name)
            .field("running", &self.thread.is_some())
            .finish()
    }
}
