use crate::executor::Task;

/// Something that accepts tasks for serialized execution.
///
/// Owners pick the strategy they need: a [`Dispatcher`](super::Dispatcher)
/// (or its [`DispatchHandle`](super::DispatchHandle)) queues without bound,
/// a [`TaskBuffer`](crate::buffer::TaskBuffer) bounds its channel and spills
/// the excess. Neither ever blocks the caller.
pub trait LocalScheduler {
    fn schedule(&self, task: Task);

    #[track_caller]
    fn schedule_fn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
        Self: Sized,
    {
        self.schedule(Task::new(f));
    }
}

impl<S: LocalScheduler + ?Sized> LocalScheduler for std::sync::Arc<S> {
    fn schedule(&self, task: Task) {
        (**self).schedule(task);
    }
}
