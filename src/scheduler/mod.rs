//! The global dispatch loop.
//!
//! A [`Dispatcher`] owns one consumer thread that executes submitted tasks
//! strictly one at a time, in submission order, interleaved with periodic
//! cron ticks. State touched only from inside tasks therefore needs no
//! further locking.

pub mod dispatcher;
pub mod local;
pub mod state;

pub use dispatcher::{DispatchHandle, Dispatcher};
pub use local::LocalScheduler;
pub use state::{AtomicLoopState, LoopState};
