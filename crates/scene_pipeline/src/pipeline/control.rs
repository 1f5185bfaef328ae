//! Pipeline state shared between the render thread and halt callers

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

/// Lifecycle state of a render pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PipelineState {
    /// Stages may be rewired
    Idle = 0,
    /// Frames are being produced
    Running = 1,
    /// Terminal; the pipeline must be rebuilt
    Halted = 2,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Halted,
        }
    }
}

/// Cooperative cancellation flag checked by every stage
#[derive(Debug, Clone, Default)]
pub struct HaltFlag(Arc<AtomicBool>);

impl HaltFlag {
    /// Create a lowered flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether halt was requested
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Request halt; returns true for the first caller only
    pub fn raise(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

/// Atomic state plus the halt flag and the thread currently in `render()`
#[derive(Debug, Default)]
pub(crate) struct ControlBlock {
    state: AtomicU8,
    halt: HaltFlag,
    render_thread: Mutex<Option<ThreadId>>,
}

impl ControlBlock {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move between non-terminal states; never leaves `Halted`
    pub(crate) fn transition(&self, from: PipelineState, to: PipelineState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Enter `Halted`; returns true for the first caller only
    pub(crate) fn halt(&self) -> bool {
        self.state.store(PipelineState::Halted as u8, Ordering::Release);
        self.halt.raise()
    }

    pub(crate) fn halt_flag(&self) -> &HaltFlag {
        &self.halt
    }

    pub(crate) fn enter_render(&self) {
        *self.render_thread.lock() = Some(thread::current().id());
    }

    pub(crate) fn leave_render(&self) {
        *self.render_thread.lock() = None;
    }

    /// Whether the calling thread is inside `render()`
    pub(crate) fn is_render_thread(&self) -> bool {
        *self.render_thread.lock() == Some(thread::current().id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halt_flag_first_raise_wins() {
        let flag = HaltFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_raised());
        assert!(clone.raise());
        assert!(!flag.raise());
        assert!(flag.is_raised());
    }

    #[test]
    fn test_halted_is_terminal() {
        let control = ControlBlock::new();
        assert_eq!(control.state(), PipelineState::Idle);
        assert!(control.transition(PipelineState::Idle, PipelineState::Running));
        assert!(control.halt());
        assert!(!control.halt());
        assert!(!control.transition(PipelineState::Halted, PipelineState::Idle));
        assert!(!control.transition(PipelineState::Running, PipelineState::Idle));
        assert_eq!(control.state(), PipelineState::Halted);
    }

    #[test]
    fn test_render_thread_tracking() {
        let control = ControlBlock::new();
        assert!(!control.is_render_thread());
        control.enter_render();
        assert!(control.is_render_thread());

        let remote = Arc::clone(&control);
        let seen_elsewhere = std::thread::spawn(move || remote.is_render_thread()).join().unwrap();
        assert!(!seen_elsewhere);

        control.leave_render();
        assert!(!control.is_render_thread());
    }
}
