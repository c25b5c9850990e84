//! Process-wide default dispatcher.
//!
//! Most servers run one dispatch loop for system work (cron, cluster
//! callbacks). These helpers keep that loop in a lazily created global so
//! collaborators can submit without threading a handle around. Components
//! that need isolation construct their own [`Dispatcher`].

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::Task;
use crate::scheduler::{Dispatcher, LoopState};
use std::sync::OnceLock;

static GLOBAL: OnceLock<Dispatcher> = OnceLock::new();

/// Install the global dispatcher with `config`. Fails if it already exists,
/// including when an earlier call to [`dispatcher`] created the default one.
pub fn init_with_config(config: Config) -> Result<()> {
    config.validate()?;
    let mut installed = false;
    GLOBAL.get_or_init(|| {
        installed = true;
        Dispatcher::build(config, None)
    });
    if installed {
        Ok(())
    } else {
        Err(Error::AlreadyInitialized)
    }
}

/// The global dispatcher, created with the default config on first use.
/// It does not run until [`start`] is called.
pub fn dispatcher() -> &'static Dispatcher {
    GLOBAL.get_or_init(|| Dispatcher::build(Config::default(), None))
}

pub fn start() {
    dispatcher().start();
}

/// Stop the global loop and wait for it. The global dispatcher can not be
/// restarted afterwards; later submissions are dropped.
pub fn shutdown() {
    if let Some(dispatcher) = GLOBAL.get() {
        dispatcher.stop();
    }
}

#[track_caller]
pub fn submit<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    dispatcher().submit_task(Task::new(f));
}

pub fn submit_task(task: Task) {
    dispatcher().submit_task(task);
}

pub fn pending_count() -> usize {
    GLOBAL.get().map(Dispatcher::pending_count).unwrap_or(0)
}

pub fn state() -> LoopState {
    GLOBAL.get().map(Dispatcher::state).unwrap_or(LoopState::Idle)
}
