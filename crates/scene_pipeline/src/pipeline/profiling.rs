//! Per-frame counters and one-shot render requests

use std::time::Duration;

/// Counters filled during one frame
///
/// Reset at the start of every `render()`; readable by the application once
/// it returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfilingData {
    /// Renderables emitted by the cull stage
    pub num_renderables: usize,
    /// Triangles emitted by the cull stage
    pub num_triangles: u64,
    /// Render callbacks issued by the output device
    pub num_draw_calls: usize,
    /// Time spent culling
    pub cull_time: Duration,
    /// Time spent sorting
    pub sort_time: Duration,
    /// Time spent drawing
    pub draw_time: Duration,
    /// Frames rendered by the pipeline so far, including this one
    pub frame_number: u64,
}

impl ProfilingData {
    /// Clear per-frame counters, keeping the frame number
    pub fn reset(&mut self) {
        *self = Self {
            frame_number: self.frame_number,
            ..Self::default()
        };
    }

    /// Sum of stage timings
    pub fn frame_time(&self) -> Duration {
        self.cull_time + self.sort_time + self.draw_time
    }
}

/// One-shot parameters for the next frame
///
/// Set through `RenderPipeline::set_request_data`, consumed by exactly one
/// `render()` call and then cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestData {
    /// Skip the frustum test for this frame
    pub disable_culling: bool,
    /// Use this detail level for every LOD group
    pub forced_lod_level: Option<usize>,
}
