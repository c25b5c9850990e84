use super::local::LocalScheduler;
use super::state::{AtomicLoopState, LoopState};
use crate::config::Config;
use crate::error::Result;
use crate::executor::{Task, TaskRunner};
use crate::telemetry::{Metrics, MetricsSnapshot};
use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, SendError, Sender};
use parking_lot::{Condvar, Mutex};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};

type Cron = Box<dyn Fn() + Send + Sync + 'static>;

struct Shared {
    config: Config,
    state: AtomicLoopState,
    tx: Sender<Task>,
    tasks: Receiver<Task>,
    over_backlog: AtomicBool,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    exited: Mutex<bool>,
    exited_cv: Condvar,
    loop_thread: Mutex<Option<ThreadId>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    runner: TaskRunner,
    cron: Option<Cron>,
}

impl Shared {
    fn mark_exited(&self) {
        let mut exited = self.exited.lock();
        *exited = true;
        self.exited_cv.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.state.load() >= LoopState::Stopping
    }

    fn submit(&self, task: Task) {
        if self.is_closed() {
            tracing::debug!(task = %task.name(), "dispatch loop closed, dropping task");
            return;
        }
        self.runner.metrics().record_submitted();
        if let Err(SendError(task)) = self.tx.send(task) {
            self.runner.metrics().record_discarded(1);
            tracing::debug!(task = %task.name(), "dispatch loop gone, dropping task");
            return;
        }

        let pending = self.tasks.len();
        if pending > self.config.global_backlog && !self.over_backlog.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                pending,
                backlog = self.config.global_backlog,
                "global task stream over backlog"
            );
        }

        // Raced with a stop whose drain has already run.
        if self.is_closed() {
            self.discard_pending();
        }
    }

    /// Drop every queued task unrun. Returns how many were dropped.
    fn discard_pending(&self) -> usize {
        let mut discarded = 0;
        while let Ok(task) = self.tasks.try_recv() {
            drop(task);
            discarded += 1;
        }
        if discarded > 0 {
            self.runner.metrics().record_discarded(discarded as u64);
            tracing::debug!(discarded, "dispatch loop closed with pending tasks");
        }
        self.over_backlog.store(false, Ordering::Relaxed);
        discarded
    }

    fn run(&self) {
        *self.loop_thread.lock() = Some(thread::current().id());
        let ticker = tick(self.config.timer_precision);
        let metrics = self.runner.metrics();

        tracing::info!(
            thread = %self.config.thread_name,
            precision = ?self.config.timer_precision,
            "dispatch loop started"
        );

        loop {
            select! {
                recv(ticker) -> _ => {
                    metrics.record_cron_tick();
                    if let Some(cron) = &self.cron {
                        self.runner.run_hook("cron", || cron());
                    }
                }
                recv(self.tasks) -> task => {
                    if let Ok(task) = task {
                        self.runner.run(task);
                    }
                    if self.tasks.is_empty() {
                        self.over_backlog.store(false, Ordering::Relaxed);
                    }
                }
                recv(self.shutdown_rx) -> _ => break,
            }
        }

        drop(ticker);
        let discarded = self.discard_pending();
        tracing::info!(discarded, "dispatch loop stopped");
        self.state.store(LoopState::Stopped);
        self.mark_exited();
    }
}

/// The single consumer of a task stream.
///
/// Tasks submitted through [`submit`](Dispatcher::submit) or any
/// [`DispatchHandle`] run one at a time on the loop thread in submission
/// order. The stream is unbounded so submission never blocks; per-owner
/// bounding is the job of [`TaskBuffer`](crate::buffer::TaskBuffer).
///
/// Once stopped, queued tasks are dropped unrun and later submissions are
/// dropped on arrival. Dropping the dispatcher stops the loop.
pub struct Dispatcher {
    shared: Arc<Shared>,
}

/// Cloneable submit-only handle to a [`Dispatcher`].
///
/// Tasks running on the loop use this to enqueue follow-up work. The handle
/// does not keep the dispatcher alive.
#[derive(Clone)]
pub struct DispatchHandle {
    shared: Weak<Shared>,
}

impl Dispatcher {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, None))
    }

    /// Like [`new`](Dispatcher::new), firing `cron` on every timer tick.
    pub fn with_cron<F>(config: Config, cron: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self::build(config, Some(Box::new(cron))))
    }

    // `config` must already be validated.
    pub(crate) fn build(config: Config, cron: Option<Cron>) -> Self {
        let (tx, rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded(0);
        let runner = TaskRunner::new(
            config.panic_strategy,
            config.slow_task_threshold,
            Arc::new(Metrics::new()),
        );

        let shared = Arc::new(Shared {
            config,
            state: AtomicLoopState::default(),
            tx,
            tasks: rx,
            over_backlog: AtomicBool::new(false),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            exited: Mutex::new(false),
            exited_cv: Condvar::new(),
            loop_thread: Mutex::new(None),
            handle: Mutex::new(None),
            runner,
            cron,
        });

        Self { shared }
    }

    /// Start consuming on a dedicated thread. Only the first call has any
    /// effect; concurrent callers race on the state and one wins.
    pub fn start(&self) {
        if let Err(state) = self
            .shared
            .state
            .transition(LoopState::Idle, LoopState::Running)
        {
            tracing::debug!(%state, "dispatch loop already started");
            return;
        }

        // Held across the spawn so a racing `stop` can not miss the handle.
        let mut slot = self.shared.handle.lock();
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(self.shared.config.thread_name.clone())
            .spawn(move || shared.run());

        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn dispatch loop thread");
                self.shared.state.store(LoopState::Stopped);
                self.shared.mark_exited();
            }
        }
    }

    /// Stop the loop and wait until it has exited.
    ///
    /// Every caller returns only after the loop thread is gone, except a
    /// caller running on the loop itself, which only signals. Tasks still
    /// queued at that point are dropped unrun.
    pub fn stop(&self) {
        let shared = &self.shared;
        loop {
            match shared.state.transition(LoopState::Running, LoopState::Stopping) {
                Ok(()) => {
                    shared.shutdown_tx.lock().take();
                    break;
                }
                Err(LoopState::Idle) => {
                    if shared
                        .state
                        .transition(LoopState::Idle, LoopState::Stopped)
                        .is_ok()
                    {
                        shared.shutdown_tx.lock().take();
                        shared.discard_pending();
                        shared.mark_exited();
                        tracing::info!("dispatch loop stopped before it was started");
                        return;
                    }
                }
                Err(_) => break,
            }
        }

        if *shared.loop_thread.lock() == Some(thread::current().id()) {
            tracing::warn!("stop called from the dispatch loop; not waiting for exit");
            return;
        }

        {
            let mut exited = shared.exited.lock();
            while !*exited {
                shared.exited_cv.wait(&mut exited);
            }
        }

        if let Some(handle) = shared.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Enqueue a task. Never blocks. Dropped if the loop is stopping.
    pub fn submit_task(&self, task: Task) {
        self.shared.submit(task);
    }

    #[track_caller]
    pub fn submit<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(Task::new(f));
    }

    #[track_caller]
    pub fn submit_labeled<L, F>(&self, label: L, f: F)
    where
        L: Into<Cow<'static, str>>,
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(Task::labeled(label, f));
    }

    pub fn handle(&self) -> DispatchHandle {
        DispatchHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Approximate number of tasks waiting to run.
    pub fn pending_count(&self) -> usize {
        self.shared.tasks.len()
    }

    /// Whether more than `global_backlog` tasks are waiting right now.
    pub fn over_backlog(&self) -> bool {
        self.pending_count() > self.shared.config.global_backlog
    }

    pub fn state(&self) -> LoopState {
        self.shared.state.load()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.runner.metrics().snapshot()
    }
}

impl LocalScheduler for Dispatcher {
    fn schedule(&self, task: Task) {
        self.submit_task(task);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .field("thread_name", &self.shared.config.thread_name)
            .finish()
    }
}

impl DispatchHandle {
    pub fn submit_task(&self, task: Task) {
        match self.shared.upgrade() {
            Some(shared) => shared.submit(task),
            None => {
                tracing::debug!(task = %task.name(), "dispatcher dropped, dropping task");
            }
        }
    }

    #[track_caller]
    pub fn submit<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(Task::new(f));
    }

    pub fn pending_count(&self) -> usize {
        self.shared.upgrade().map_or(0, |shared| shared.tasks.len())
    }
}

impl LocalScheduler for DispatchHandle {
    fn schedule(&self, task: Task) {
        self.submit_task(task);
    }
}

impl std::fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::PanicStrategy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_config() -> Config {
        Config::builder()
            .timer_precision(Duration::from_millis(5))
            .panic_strategy(PanicStrategy::Isolate)
            .thread_name("dispatch-test")
            .build()
            .unwrap()
    }

    #[test]
    fn test_runs_tasks_in_order() {
        let dispatcher = Dispatcher::new(test_config()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = bounded(1);

        for i in 0..100 {
            let seen = seen.clone();
            dispatcher.submit(move || seen.lock().push(i));
        }
        dispatcher.submit(move || done_tx.send(()).unwrap());

        dispatcher.start();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
        dispatcher.stop();
        assert_eq!(dispatcher.state(), LoopState::Stopped);
    }

    #[test]
    fn test_pending_before_start() {
        let dispatcher = Dispatcher::new(test_config()).unwrap();
        dispatcher.submit(|| {});
        dispatcher.submit(|| {});
        assert_eq!(dispatcher.pending_count(), 2);
        assert_eq!(dispatcher.state(), LoopState::Idle);
    }

    #[test]
    fn test_cron_fires() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = ticks.clone();
        let dispatcher =
            Dispatcher::with_cron(test_config(), move || {
                t.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        dispatcher.start();
        thread::sleep(Duration::from_millis(60));
        dispatcher.stop();

        assert!(ticks.load(Ordering::SeqCst) >= 2);
        assert!(dispatcher.metrics().cron_ticks >= 2);
    }

    #[test]
    fn test_panicking_cron_keeps_loop_alive() {
        let dispatcher =
            Dispatcher::with_cron(test_config(), || panic!("cron broke")).unwrap();
        let (tx, rx) = bounded(1);

        dispatcher.start();
        thread::sleep(Duration::from_millis(20));
        dispatcher.submit(move || tx.send(()).unwrap());

        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(dispatcher.is_running());
    }

    #[test]
    fn test_stop_without_start() {
        let dispatcher = Dispatcher::new(test_config()).unwrap();
        dispatcher.stop();
        assert_eq!(dispatcher.state(), LoopState::Stopped);

        dispatcher.start();
        assert_eq!(dispatcher.state(), LoopState::Stopped);
    }

    #[test]
    fn test_stop_from_inside_task_does_not_deadlock() {
        let dispatcher = Arc::new(Dispatcher::new(test_config()).unwrap());
        let d = dispatcher.clone();
        let (tx, rx) = bounded(1);

        dispatcher.start();
        dispatcher.submit(move || {
            d.stop();
            tx.send(()).unwrap();
        });

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        dispatcher.stop();
        assert_eq!(dispatcher.state(), LoopState::Stopped);
    }

    #[test]
    fn test_handle_submits_from_task() {
        let dispatcher = Dispatcher::new(test_config()).unwrap();
        let handle = dispatcher.handle();
        let (tx, rx) = bounded(1);

        dispatcher.start();
        dispatcher.submit(move || {
            handle.submit(move || tx.send(42).unwrap());
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        assert_eq!(dispatcher.metrics().tasks_submitted, 2);
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_submit_after_stop_is_dropped() {
        let dispatcher = Dispatcher::new(test_config()).unwrap();
        let handle = dispatcher.handle();
        let released = Arc::new(AtomicUsize::new(0));

        dispatcher.start();
        dispatcher.stop();

        for _ in 0..1000 {
            let token = DropCounter(released.clone());
            dispatcher.submit(move || drop(token));
        }
        let token = DropCounter(released.clone());
        handle.submit(move || drop(token));

        assert_eq!(dispatcher.pending_count(), 0);
        assert_eq!(released.load(Ordering::SeqCst), 1001);
        assert_eq!(dispatcher.metrics().tasks_submitted, 0);

        drop(dispatcher);
        let token = DropCounter(released.clone());
        handle.submit(move || drop(token));
        assert_eq!(released.load(Ordering::SeqCst), 1002);
        assert_eq!(handle.pending_count(), 0);
    }

    #[test]
    fn test_stop_discards_queued_tasks() {
        let dispatcher = Dispatcher::new(test_config()).unwrap();
        let released = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let token = DropCounter(released.clone());
            dispatcher.submit(move || drop(token));
        }
        dispatcher.stop();

        assert_eq!(dispatcher.pending_count(), 0);
        assert_eq!(released.load(Ordering::SeqCst), 10);
        let metrics = dispatcher.metrics();
        assert_eq!(metrics.tasks_discarded, 10);
        assert_eq!(metrics.backlog(), 0);
    }

    #[test]
    fn test_over_backlog() {
        let config = Config::builder()
            .timer_precision(Duration::from_millis(5))
            .global_backlog(4)
            .build()
            .unwrap();
        let dispatcher = Dispatcher::new(config).unwrap();

        for _ in 0..5 {
            dispatcher.submit(|| {});
        }
        assert!(dispatcher.over_backlog());

        let (tx, rx) = bounded(1);
        dispatcher.submit(move || tx.send(()).unwrap());
        dispatcher.start();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!dispatcher.over_backlog());
    }

    #[test]
    fn test_backlog_drains_after_panic() {
        let dispatcher = Dispatcher::new(test_config()).unwrap();
        let (tx, rx) = bounded(1);

        dispatcher.submit(|| panic!("handler failed"));
        dispatcher.submit(|| {});
        dispatcher.submit(move || tx.send(()).unwrap());
        dispatcher.start();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        dispatcher.stop();

        let metrics = dispatcher.metrics();
        assert_eq!(metrics.tasks_panicked, 1);
        assert_eq!(metrics.backlog(), 0);
    }

    #[test]
    fn test_racing_stop_joins_loop_thread() {
        for _ in 0..50 {
            let dispatcher = Arc::new(Dispatcher::new(test_config()).unwrap());
            let d = dispatcher.clone();
            let stopper = thread::spawn(move || d.stop());
            dispatcher.start();
            stopper.join().unwrap();
            dispatcher.stop();

            assert_eq!(dispatcher.state(), LoopState::Stopped);
            assert!(dispatcher.shared.handle.lock().is_none());
        }
    }
}
