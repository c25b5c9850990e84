use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicStrategy {
    /// Abort the process on the first task panic.
    Abort,
    /// Contain the panic without logging it.
    Isolate,
    /// Contain the panic and log it with its stack context.
    LogAndContinue,
}

impl Default for PanicStrategy {
    fn default() -> Self {
        PanicStrategy::LogAndContinue
    }
}

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static CAPTURED: RefCell<Option<(String, String)>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

// Chains the previously installed hook. While a handler on this thread is
// executing a closure the panic is recorded instead of printed.
fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let location = info
                    .location()
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "<unknown>".to_string());
                let backtrace = Backtrace::force_capture().to_string();
                CAPTURED.with(|slot| *slot.borrow_mut() = Some((location, backtrace)));
            } else {
                previous(info);
            }
        }));
    });
}

struct CaptureGuard {
    was_capturing: bool,
}

impl CaptureGuard {
    fn enter() -> Self {
        let was_capturing = CAPTURING.with(|c| c.replace(true));
        Self { was_capturing }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        CAPTURING.with(|c| c.set(self.was_capturing));
    }
}

pub struct PanicHandler {
    strategy: PanicStrategy,
    panic_count: AtomicUsize,
}

impl PanicHandler {
    pub fn new(strategy: PanicStrategy) -> Self {
        install_hook();
        Self {
            strategy,
            panic_count: AtomicUsize::new(0),
        }
    }

    /// Run `f`, containing any panic it raises.
    ///
    /// `context` names the work being run and is only used for logging.
    pub fn execute<F, R>(&self, context: &str, f: F) -> Result<R, PanicInfo>
    where
        F: FnOnce() -> R,
    {
        let result = {
            let _guard = CaptureGuard::enter();
            catch_unwind(AssertUnwindSafe(f))
        };

        match result {
            Ok(result) => Ok(result),
            Err(payload) => {
                self.panic_count.fetch_add(1, Ordering::Relaxed);

                let panic_info = PanicInfo::from_payload(payload);

                match self.strategy {
                    PanicStrategy::Abort => {
                        tracing::error!(
                            task = context,
                            message = %panic_info.message,
                            location = panic_info.location.as_deref().unwrap_or("<unknown>"),
                            "task panicked, aborting"
                        );
                        std::process::abort();
                    }
                    PanicStrategy::Isolate => {}
                    PanicStrategy::LogAndContinue => {
                        tracing::error!(
                            task = context,
                            message = %panic_info.message,
                            location = panic_info.location.as_deref().unwrap_or("<unknown>"),
                            "handle task panic\n{}",
                            panic_info.backtrace.as_deref().unwrap_or("")
                        );
                    }
                }

                Err(panic_info)
            }
        }
    }

    pub fn panic_count(&self) -> usize {
        self.panic_count.load(Ordering::Relaxed)
    }

    pub fn reset_count(&self) {
        self.panic_count.store(0, Ordering::Relaxed);
    }

    pub fn strategy(&self) -> PanicStrategy {
        self.strategy
    }
}

impl Default for PanicHandler {
    fn default() -> Self {
        Self::new(PanicStrategy::default())
    }
}

impl std::fmt::Debug for PanicHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanicHandler")
            .field("strategy", &self.strategy)
            .field("panic_count", &self.panic_count())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PanicInfo {
    pub message: String,
    pub location: Option<String>,
    pub backtrace: Option<String>,
}

impl PanicInfo {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        let (location, backtrace) = match CAPTURED.with(|slot| slot.borrow_mut().take()) {
            Some((location, backtrace)) => (Some(location), Some(backtrace)),
            None => (None, None),
        };

        Self {
            message,
            location,
            backtrace,
        }
    }
}
