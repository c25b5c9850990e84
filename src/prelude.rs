pub use crate::buffer::{Admission, BufferReceiver, BufferWorker, TaskBuffer, TeardownPolicy};
pub use crate::config::{BufferConfig, Config, ConfigBuilder};
pub use crate::error::{Error, Result};
pub use crate::executor::{PanicStrategy, Task};
pub use crate::scheduler::{DispatchHandle, Dispatcher, LocalScheduler, LoopState};
pub use crate::telemetry::LatencySampler;
