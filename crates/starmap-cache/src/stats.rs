//! Per-frame cache counters.

/// What the cache did during one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub generation: u64,
    /// Tiles visited by the traversal.
    pub touched: usize,
    pub in_view: usize,
    /// Quadrant draws issued.
    pub drawn: usize,
    /// Download queue length after processing.
    pub queued: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    pub purged: usize,
    pub registry_size: usize,
    pub ready_count: usize,
    /// Free download slots at the end of the frame.
    pub open_threads: u32,
}
