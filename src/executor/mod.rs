//! Task execution infrastructure.
//!
//! This module provides the task type handed to schedulers and the runner
//! that executes it with panic containment and slow-task diagnostics.

pub mod panic_handler;
pub mod runner;
pub mod task;

pub use panic_handler::{PanicHandler, PanicInfo, PanicStrategy};
pub use runner::{Outcome, TaskRunner};
pub use task::{Task, TaskId};
