//! Bounded, per-owner task queues.
//!
//! A [`TaskBuffer`] gives one owner (typically a session) a private queue
//! whose channel is fixed in size. Work past the high-water mark spills to
//! an overflow list instead of blocking the producer, which matters when a
//! task running on the buffer's consumer submits more work to the same
//! buffer.

pub mod admission;
pub mod task_buffer;
pub mod worker;

pub use admission::{Admission, AdmissionState};
pub use task_buffer::{BufferReceiver, BufferStats, TaskBuffer};
pub use worker::{BufferWorker, TeardownPolicy};
