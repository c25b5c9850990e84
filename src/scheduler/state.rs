use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a dispatch loop. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LoopState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl LoopState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LoopState::Idle,
            1 => LoopState::Running,
            2 => LoopState::Stopping,
            _ => LoopState::Stopped,
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopState::Idle => "idle",
            LoopState::Running => "running",
            LoopState::Stopping => "stopping",
            LoopState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct AtomicLoopState {
    state: AtomicU8,
}

impl AtomicLoopState {
    pub fn new(state: LoopState) -> Self {
        Self {
            state: AtomicU8::new(state as u8),
        }
    }

    pub fn load(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn store(&self, state: LoopState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to`. Only one of several racing callers wins;
    /// the others get the state they observed.
    pub fn transition(&self, from: LoopState, to: LoopState) -> Result<(), LoopState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(LoopState::from_u8)
    }
}

impl Default for AtomicLoopState {
    fn default() -> Self {
        Self::new(LoopState::Idle)
    }
}
