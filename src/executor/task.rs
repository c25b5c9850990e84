//! Task representation and execution.

use std::borrow::Cow;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Global task ID counter
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A zero-argument unit of deferred work.
///
/// Besides the closure a task carries an id, an optional label and the
/// source location it was created at. Slow-task and panic diagnostics
/// report those instead of introspecting the closure.
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) label: Option<Cow<'static, str>>,
    pub(crate) origin: &'static Location<'static>,
    pub(crate) func: Box<dyn FnOnce() + Send + 'static>,
    pub(crate) submitted_at: Instant,
}

impl Task {
    /// Create an unlabeled task originating at the caller's location.
    #[track_caller]
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            id: TaskId::next(),
            label: None,
            origin: Location::caller(),
            func: Box::new(f),
            submitted_at: Instant::now(),
        }
    }

    /// Create a task with an explicit label for diagnostics.
    #[track_caller]
    pub fn labeled<L, F>(label: L, f: F) -> Self
    where
        L: Into<Cow<'static, str>>,
        F: FnOnce() + Send + 'static,
    {
        let mut task = Task::new(f);
        task.label = Some(label.into());
        task
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn origin(&self) -> &'static Location<'static> {
        self.origin
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Label if present, otherwise the creation site.
    pub fn name(&self) -> Cow<'_, str> {
        match &self.label {
            Some(label) => Cow::Borrowed(label.as_ref()),
            None => Cow::Owned(self.origin.to_string()),
        }
    }

    /// Execute the task
    pub fn execute(self) {
        (self.func)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("origin", &format_args!("{}", self.origin))
            .field("submitted_at", &self.submitted_at)
            .finish()
    }
}
