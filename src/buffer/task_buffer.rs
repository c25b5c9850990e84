use super::admission::{Admission, AdmissionState};
use crate::config::BufferConfig;
use crate::error::{Error, Result};
use crate::executor::{Task, TaskRunner};
use crate::scheduler::LocalScheduler;
use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError,
};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

struct Shared {
    config: BufferConfig,
    state: AdmissionState,
    spill: Mutex<VecDeque<Task>>,
    // Tasks discarded while the spill lock is held. Dropped only after it
    // is released, since a task's captures may submit to this buffer.
    discarded: Mutex<Vec<Task>>,
    tx: Sender<Task>,
}

impl Shared {
    fn with_spill<R>(&self, f: impl FnOnce(&mut VecDeque<Task>) -> R) -> R {
        let result = {
            let mut spill = self.spill.lock();
            f(&mut spill)
        };
        self.reap();
        result
    }

    fn discard_locked(&self, tasks: impl IntoIterator<Item = Task>) {
        self.discarded.lock().extend(tasks);
    }

    fn reap(&self) {
        let discarded = std::mem::take(&mut *self.discarded.lock());
        drop(discarded);
    }

    /// Send into the channel, spilling instead if it is full. Callers hold
    /// the spill lock.
    fn push_locked(&self, task: Task, spill: &mut VecDeque<Task>) -> Admission {
        self.state.on_admit();
        match self.tx.try_send(task) {
            Ok(()) => Admission::Direct,
            Err(TrySendError::Full(task)) => {
                self.state.on_admit_failed();
                self.spill_locked(task, spill)
            }
            Err(TrySendError::Disconnected(task)) => {
                self.state.on_admit_failed();
                self.state.record_dropped(1);
                tracing::debug!("task buffer consumer gone, dropping task");
                self.discard_locked([task]);
                Admission::Dropped
            }
        }
    }

    fn spill_locked(&self, task: Task, spill: &mut VecDeque<Task>) -> Admission {
        let first = spill.is_empty();
        if first && self.state.enter_saturated() {
            tracing::warn!(
                admitted = self.state.admitted(),
                task_max = self.config.task_max,
                "tasks queue is full, spilling"
            );
        }
        spill.push_back(task);
        self.state.record_spilled();

        // The consumer may have emptied the channel before the flag was
        // raised, in which case nobody else would resume this task.
        if first && self.state.admitted() == 0 {
            self.resume_locked(spill);
        }
        Admission::Spilled
    }

    /// Move up to `task_resume` spilled tasks into the channel, clearing the
    /// Saturated flag once the spill list is empty.
    fn resume_locked(&self, spill: &mut VecDeque<Task>) {
        let mut resumed = 0;
        while resumed < self.config.task_resume {
            let Some(task) = spill.pop_front() else {
                break;
            };
            self.state.on_admit();
            match self.tx.try_send(task) {
                Ok(()) => resumed += 1,
                Err(TrySendError::Full(task)) => {
                    self.state.on_admit_failed();
                    spill.push_front(task);
                    break;
                }
                Err(TrySendError::Disconnected(task)) => {
                    self.state.on_admit_failed();
                    self.state.record_dropped(spill.len() + 1);
                    self.discard_locked(std::iter::once(task).chain(spill.drain(..)));
                    break;
                }
            }
        }
        self.state.record_resumed(resumed);

        if spill.is_empty() && self.state.leave_saturated() {
            tracing::info!("tasks queue is empty now");
        }
    }

    /// Resume a chunk if the channel is below the mark. Returns whether a
    /// new task may go straight into the channel.
    fn prepare_locked(&self, spill: &mut VecDeque<Task>) -> bool {
        if !self.state.has_room(self.config.task_max) {
            return false;
        }
        if self.state.is_saturated() {
            self.resume_locked(spill);
        }
        spill.is_empty()
    }

    fn admit_locked(&self, task: Task, spill: &mut VecDeque<Task>) -> Admission {
        if self.prepare_locked(spill) {
            self.push_locked(task, spill)
        } else {
            self.spill_locked(task, spill)
        }
    }

    // Producers resume on their next submit. The consumer only steps in
    // when it has emptied the channel, so a spilled tail is never stranded
    // once producers go quiet.
    fn on_consumed(&self) {
        self.state.on_consume();
        if self.state.is_saturated() && self.state.admitted() == 0 {
            self.with_spill(|spill| self.resume_locked(spill));
        }
    }
}

/// Producer side of a bounded, per-owner task queue.
///
/// Tasks go straight into a fixed-capacity channel while fewer than
/// `task_max` are waiting in it. Past that mark they spill into an unbounded
/// list that is fed back `task_resume` at a time, and the buffer stays
/// Saturated until the list is empty. Submission therefore never blocks,
/// including from a task running on the buffer's own consumer, and order is
/// kept across the spill boundary.
#[derive(Clone)]
pub struct TaskBuffer {
    shared: Arc<Shared>,
}

/// Consumer side of a [`TaskBuffer`]. Dropping it discards whatever is
/// still pending; later submissions are dropped too.
pub struct BufferReceiver {
    shared: Arc<Shared>,
    rx: Receiver<Task>,
}

/// Point-in-time view of a buffer, for observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    pub admitted: usize,
    pub spilled: usize,
    pub saturated: bool,
    pub saturations: u64,
    pub spilled_total: u64,
    pub resumed_total: u64,
    pub dropped_total: u64,
}

impl TaskBuffer {
    pub fn new(config: BufferConfig) -> Result<(TaskBuffer, BufferReceiver)> {
        config.validate()?;
        let (tx, rx) = bounded(config.channel_capacity);
        let shared = Arc::new(Shared {
            config,
            state: AdmissionState::new(),
            spill: Mutex::new(VecDeque::new()),
            discarded: Mutex::new(Vec::new()),
            tx,
        });
        Ok((
            TaskBuffer {
                shared: shared.clone(),
            },
            BufferReceiver { shared, rx },
        ))
    }

    /// Queue a task without blocking.
    pub fn submit_task(&self, task: Task) -> Admission {
        let shared = &self.shared;
        if shared.state.has_room(shared.config.task_max) && !shared.state.is_saturated() {
            shared.state.on_admit();
            match shared.tx.try_send(task) {
                Ok(()) => return Admission::Direct,
                Err(TrySendError::Full(task)) => {
                    shared.state.on_admit_failed();
                    return shared.with_spill(|spill| shared.spill_locked(task, spill));
                }
                Err(TrySendError::Disconnected(_)) => {
                    shared.state.on_admit_failed();
                    shared.state.record_dropped(1);
                    tracing::debug!("task buffer consumer gone, dropping task");
                    return Admission::Dropped;
                }
            }
        }

        shared.with_spill(|spill| shared.admit_locked(task, spill))
    }

    #[track_caller]
    pub fn submit<F>(&self, f: F) -> Admission
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(Task::new(f))
    }

    #[track_caller]
    pub fn submit_labeled<L, F>(&self, label: L, f: F) -> Admission
    where
        L: Into<Cow<'static, str>>,
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(Task::labeled(label, f))
    }

    /// Like [`submit_task`](TaskBuffer::submit_task), but rejects the task
    /// with [`Error::QueueOverflow`] when it would grow the spill list past
    /// the configured `spill_limit`.
    pub fn try_submit(&self, task: Task) -> Result<Admission> {
        let shared = &self.shared;
        shared.with_spill(|spill| {
            if shared.prepare_locked(spill) {
                return Ok(shared.push_locked(task, spill));
            }
            if let Some(limit) = shared.config.spill_limit {
                if spill.len() >= limit {
                    tracing::warn!(limit, task = %task.name(), "task rejected, spill list full");
                    shared.discard_locked([task]);
                    return Err(Error::QueueOverflow { limit });
                }
            }
            Ok(shared.spill_locked(task, spill))
        })
    }

    /// Admit a batch under a single lock acquisition, in iteration order.
    pub fn submit_batch<I>(&self, tasks: I) -> usize
    where
        I: IntoIterator<Item = Task>,
    {
        let shared = &self.shared;
        shared.with_spill(|spill| {
            let mut spilled = 0;
            for task in tasks {
                if shared.admit_locked(task, spill) == Admission::Spilled {
                    spilled += 1;
                }
            }
            spilled
        })
    }

    pub fn is_saturated(&self) -> bool {
        self.shared.state.is_saturated()
    }

    pub fn admitted(&self) -> usize {
        self.shared.state.admitted()
    }

    pub fn spilled(&self) -> usize {
        self.shared.spill.lock().len()
    }

    pub fn config(&self) -> &BufferConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> BufferStats {
        stats(&self.shared)
    }
}

fn stats(shared: &Shared) -> BufferStats {
    let spilled = shared.spill.lock().len();
    BufferStats {
        admitted: shared.state.admitted(),
        spilled,
        saturated: shared.state.is_saturated(),
        saturations: shared.state.saturations(),
        spilled_total: shared.state.spilled_total(),
        resumed_total: shared.state.resumed_total(),
        dropped_total: shared.state.dropped_total(),
    }
}

impl LocalScheduler for TaskBuffer {
    fn schedule(&self, task: Task) {
        self.submit_task(task);
    }
}

impl std::fmt::Debug for TaskBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskBuffer")
            .field("stats", &self.stats())
            .finish()
    }
}

impl BufferReceiver {
    /// Account for a task pulled off the channel directly.
    pub(crate) fn take(&self, task: Task) -> Task {
        self.shared.on_consumed();
        task
    }

    pub fn try_recv(&self) -> Option<Task> {
        match self.rx.try_recv() {
            Ok(task) => Some(self.take(task)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Task> {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => Some(self.take(task)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Block for the next task.
    pub fn recv(&self) -> Option<Task> {
        self.rx.recv().ok().map(|task| self.take(task))
    }

    pub(crate) fn channel(&self) -> &Receiver<Task> {
        &self.rx
    }

    /// Run everything currently pending, spilled tasks included, in order.
    pub fn flush(&self, runner: &TaskRunner) -> usize {
        let mut ran = 0;
        loop {
            while let Some(task) = self.try_recv() {
                runner.run(task);
                ran += 1;
            }
            let drained = self.shared.with_spill(|spill| {
                if spill.is_empty() {
                    return true;
                }
                self.shared.resume_locked(spill);
                false
            });
            if drained {
                break ran;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn stats(&self) -> BufferStats {
        stats(&self.shared)
    }
}

impl Drop for BufferReceiver {
    fn drop(&mut self) {
        let mut discarded = 0;
        // Dropping a task may submit more, so repeat until both are empty.
        loop {
            while self.rx.try_recv().is_ok() {
                self.shared.state.on_consume();
                discarded += 1;
            }
            let spilled = std::mem::take(&mut *self.shared.spill.lock());
            if spilled.is_empty() {
                break;
            }
            discarded += spilled.len();
            drop(spilled);
        }
        self.shared.state.leave_saturated();
        self.shared.reap();
        if discarded > 0 {
            self.shared.state.record_dropped(discarded);
            tracing::debug!(discarded, "task buffer closed with pending tasks");
        }
    }
}

impl std::fmt::Debug for BufferReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferReceiver")
            .field("len", &self.len())
            .finish()
    }
}
