//! Serialized task dispatch for networked servers.
//!
//! Application state (sessions, rooms, game state) is mutated only from
//! tasks that run one at a time on a single consumer, so it needs no locks.
//! Producers on any thread hand work over without ever blocking.
//!
//! # Quick Start
//!
//! ```no_run
//! use dispatch_rs::prelude::*;
//! use std::time::Duration;
//!
//! let config = Config::builder()
//!     .timer_precision(Duration::from_millis(100))
//!     .build()
//!     .unwrap();
//!
//! let dispatcher = Dispatcher::with_cron(config, || {
//!     // periodic housekeeping
//! })
//! .unwrap();
//! dispatcher.start();
//!
//! dispatcher.submit_labeled("room.join", || {
//!     // mutate room state
//! });
//!
//! // A per-session queue with a bounded channel.
//! let (session_queue, receiver) = TaskBuffer::new(BufferConfig::default()).unwrap();
//! let worker = BufferWorker::spawn("session-42", receiver, dispatcher.config()).unwrap();
//! session_queue.submit(|| { /* handle inbound message */ });
//!
//! worker.shutdown(TeardownPolicy::Flush);
//! dispatcher.stop();
//! ```
//!
//! # Components
//!
//! - **Dispatch loop** ([`Dispatcher`]): unbounded FIFO stream, one consumer
//!   thread, periodic cron ticks, idempotent start and stop.
//! - **Task buffers** ([`TaskBuffer`]): per-owner bounded channel with a
//!   spill list, so a task may submit into its own full queue without
//!   deadlocking.
//! - **Fault containment**: every task runs under a panic handler and is
//!   timed; panics and slow tasks are logged through `tracing`.
//! - **Latency sampling** ([`LatencySampler`]): rolling four-sample average.

#![warn(missing_debug_implementations)]

pub mod buffer;
pub mod config;
pub mod error;
pub mod executor;
pub mod prelude;
pub mod runtime;
pub mod scheduler;
pub mod telemetry;

pub use buffer::{Admission, BufferReceiver, BufferWorker, TaskBuffer, TeardownPolicy};
pub use config::{BufferConfig, Config, ConfigBuilder};
pub use error::{Error, Result};
pub use executor::{PanicStrategy, Task, TaskId};
pub use scheduler::{DispatchHandle, Dispatcher, LocalScheduler, LoopState};
pub use telemetry::LatencySampler;
