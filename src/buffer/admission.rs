//! Counters and the overflow flag behind a [`TaskBuffer`](super::TaskBuffer).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Where a submitted task ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Placed straight into the inner channel.
    Direct,
    /// Parked in the spill list until the channel has room.
    Spilled,
    /// The consumer is gone; the task was discarded.
    Dropped,
}

/// Occupancy of the inner channel plus the Normal/Saturated flag.
///
/// `admitted` is raised before a task is sent and lowered after it is
/// received, so it never underflows. All accesses are sequentially
/// consistent: a consumer that sees the flag clear after lowering the count
/// is guaranteed that a producer raising the flag later sees the lowered
/// count.
#[derive(Debug, Default)]
pub struct AdmissionState {
    admitted: AtomicUsize,
    saturated: AtomicBool,
    saturations: AtomicU64,
    spilled_total: AtomicU64,
    resumed_total: AtomicU64,
    dropped_total: AtomicU64,
}

impl AdmissionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }

    /// Room for direct admission below the high-water mark.
    pub fn has_room(&self, task_max: usize) -> bool {
        self.admitted() < task_max
    }

    pub fn is_saturated(&self) -> bool {
        self.saturated.load(Ordering::SeqCst)
    }

    pub(crate) fn on_admit(&self) {
        self.admitted.fetch_add(1, Ordering::SeqCst);
    }

    /// Undo an `on_admit` whose send did not go through.
    pub(crate) fn on_admit_failed(&self) {
        self.admitted.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn on_consume(&self) {
        self.admitted.fetch_sub(1, Ordering::SeqCst);
    }

    /// Flip to Saturated. Returns true if this call made the transition.
    pub(crate) fn enter_saturated(&self) -> bool {
        let entered = !self.saturated.swap(true, Ordering::SeqCst);
        if entered {
            self.saturations.fetch_add(1, Ordering::Relaxed);
        }
        entered
    }

    /// Flip back to Normal. Returns true if this call made the transition.
    pub(crate) fn leave_saturated(&self) -> bool {
        self.saturated.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn record_spilled(&self) {
        self.spilled_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resumed(&self, n: usize) {
        self.resumed_total.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, n: usize) {
        self.dropped_total.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn saturations(&self) -> u64 {
        self.saturations.load(Ordering::Relaxed)
    }

    pub fn spilled_total(&self) -> u64 {
        self.spilled_total.load(Ordering::Relaxed)
    }

    pub fn resumed_total(&self) -> u64 {
        self.resumed_total.load(Ordering::Relaxed)
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_and_consume() {
        let state = AdmissionState::new();

        for _ in 0..3 {
            state.on_admit();
        }
        assert!(!state.has_room(3));
        assert!(state.has_room(4));

        state.on_consume();
        assert!(state.has_room(3));
        assert_eq!(state.admitted(), 2);
    }

    #[test]
    fn test_saturation_transitions_counted_once() {
        let state = AdmissionState::new();

        assert!(state.enter_saturated());
        assert!(!state.enter_saturated());
        assert!(state.is_saturated());
        assert_eq!(state.saturations(), 1);

        assert!(state.leave_saturated());
        assert!(!state.leave_saturated());
        assert!(!state.is_saturated());

        assert!(state.enter_saturated());
        assert_eq!(state.saturations(), 2);
    }
}
