//! Render pipeline orchestrator
//!
//! Runs cull, sort and draw as one synchronous call chain per frame and
//! owns the `Idle -> Running -> Halted` state machine. The stages never see
//! each other: the pipeline hands the cull output to the sorter and the
//! sorted frame to the output device.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::foundation::time::{FrameLimiter, Stopwatch};
use crate::pipeline::control::{ControlBlock, PipelineState};
use crate::pipeline::cull::CullStage;
use crate::pipeline::device::OutputDevice;
use crate::pipeline::error::{ErrorReporter, LogErrorReporter, PipelineError, PipelineResult};
use crate::pipeline::profiling::{ProfilingData, RequestData};
use crate::pipeline::sort::SortStage;
use crate::scene::{Layer, SceneGraph};

type SharedDevice = Arc<Mutex<Option<Box<dyn OutputDevice>>>>;

/// Outcome of one pipeline call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameStatus {
    /// The frame reached the output device
    Drawn,
    /// Nothing to do: no layers, or a stage is not wired
    Skipped,
    /// The device reported a transient failure and is still usable
    DrawFailed,
    /// The device was lost; the pipeline has halted
    Terminated,
    /// The pipeline was halted before or during the call
    Halted,
}

impl FrameStatus {
    /// Whether the session can continue
    pub fn is_success(self) -> bool {
        matches!(self, Self::Drawn | Self::Skipped | Self::DrawFailed)
    }
}

/// Cloneable handle that halts a pipeline from any thread
///
/// Safe to call while a frame is in flight: once `halt` returns no further
/// draw call reaches the output device. Called from inside the frame (for
/// example by a stage), disposal is finished by the interrupted `render` or
/// `display_only` on its way out.
#[derive(Clone)]
pub struct HaltHandle {
    control: Arc<ControlBlock>,
    device: SharedDevice,
}

impl HaltHandle {
    /// Halt the pipeline; later calls do nothing
    pub fn halt(&self) {
        if self.control.halt() {
            log::info!("Render pipeline halted");
        }
        if self.control.is_render_thread() {
            return;
        }
        // Waits for an in-flight draw, which stops at the next op
        if let Some(device) = self.device.lock().as_mut() {
            device.dispose();
        }
    }

    /// Whether halt has been requested
    pub fn is_halted(&self) -> bool {
        self.control.halt_flag().is_raised()
    }
}

impl fmt::Debug for HaltHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HaltHandle").field("state", &self.control.state()).finish_non_exhaustive()
    }
}

/// Cull, sort and draw pipeline
pub struct RenderPipeline {
    control: Arc<ControlBlock>,
    culler: Option<Box<dyn CullStage>>,
    sorter: Option<Box<dyn SortStage>>,
    device: SharedDevice,
    layers: Vec<Layer>,
    request: Option<RequestData>,
    reporter: Arc<dyn ErrorReporter>,
    limiter: FrameLimiter,
}

impl fmt::Debug for RenderPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPipeline")
            .field("state", &self.state())
            .field("culler", &self.culler.as_ref().map(|c| c.name()))
            .field("sorter", &self.sorter.as_ref().map(|s| s.name()))
            .field("layers", &self.layers.len())
            .field("minimum_frame_interval", &self.limiter.minimum_interval())
            .finish_non_exhaustive()
    }
}

impl Default for RenderPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPipeline {
    /// Create an idle pipeline with no stages
    pub fn new() -> Self {
        Self {
            control: ControlBlock::new(),
            culler: None,
            sorter: None,
            device: Arc::new(Mutex::new(None)),
            layers: Vec::new(),
            request: None,
            reporter: Arc::new(LogErrorReporter),
            limiter: FrameLimiter::default(),
        }
    }

    /// Current state
    pub fn state(&self) -> PipelineState {
        self.control.state()
    }

    /// Whether the pipeline has halted
    pub fn is_halted(&self) -> bool {
        self.state() == PipelineState::Halted
    }

    fn check_wiring(&self, stage: &'static str) -> PipelineResult<bool> {
        match self.state() {
            PipelineState::Running => Err(PipelineError::WiringWhileRunning(stage)),
            PipelineState::Halted => {
                log::debug!("Ignoring {} change on halted pipeline", stage);
                Ok(false)
            }
            PipelineState::Idle => Ok(true),
        }
    }

    /// Replace the cull stage; only while not running
    pub fn set_culler(&mut self, mut culler: Box<dyn CullStage>) -> PipelineResult<()> {
        if self.check_wiring("culler")? {
            culler.bind_halt_flag(self.control.halt_flag().clone());
            log::info!("Cull stage set to {}", culler.name());
            self.culler = Some(culler);
        }
        Ok(())
    }

    /// Replace the sort stage; only while not running
    pub fn set_sorter(&mut self, mut sorter: Box<dyn SortStage>) -> PipelineResult<()> {
        if self.check_wiring("sorter")? {
            sorter.bind_halt_flag(self.control.halt_flag().clone());
            log::info!("Sort stage set to {}", sorter.name());
            self.sorter = Some(sorter);
        }
        Ok(())
    }

    /// Replace the output device; only while not running
    ///
    /// A replaced device is disposed.
    pub fn set_output_device(&mut self, mut device: Box<dyn OutputDevice>) -> PipelineResult<()> {
        if self.check_wiring("output device")? {
            device.bind_halt_flag(self.control.halt_flag().clone());
            log::info!("Output device set ({:?})", device.capabilities().features);
            if let Some(mut previous) = self.device.lock().replace(device) {
                previous.dispose();
            }
        }
        Ok(())
    }

    /// Route frame-time diagnostics to a reporter
    pub fn set_error_reporter(&mut self, reporter: Arc<dyn ErrorReporter>) {
        self.reporter = reporter;
    }

    /// Current error reporter
    pub fn error_reporter(&self) -> &Arc<dyn ErrorReporter> {
        &self.reporter
    }

    /// Replace the rendered layers, back to front
    pub fn set_layers(&mut self, layers: Vec<Layer>) {
        self.layers = layers;
    }

    /// Rendered layers
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Parameters for the next `render()` only
    ///
    /// Legal before the first frame. A second call before the next frame
    /// replaces the first.
    pub fn set_request_data(&mut self, request: RequestData) {
        if !self.is_halted() {
            self.request = Some(request);
        }
    }

    /// Floor on the spacing between frames; zero means uncapped
    pub fn set_minimum_frame_interval(&mut self, interval_ms: u32) {
        self.limiter.set_minimum_interval(interval_ms);
    }

    /// Current frame spacing floor
    pub fn minimum_frame_interval(&self) -> Duration {
        self.limiter.minimum_interval()
    }

    /// Block until the frame spacing floor allows the next frame
    pub fn wait_for_next_frame(&mut self) {
        self.limiter.wait_for_next_frame();
    }

    /// Handle that halts this pipeline from other threads or stages
    pub fn halt_handle(&self) -> HaltHandle {
        HaltHandle {
            control: Arc::clone(&self.control),
            device: Arc::clone(&self.device),
        }
    }

    /// Halt the pipeline and dispose the output device
    ///
    /// Terminal and idempotent.
    pub fn halt(&self) {
        self.halt_handle().halt();
    }

    /// Enter `Running` after checking every stage is wired
    ///
    /// `render` starts an idle pipeline implicitly; this is the checked form.
    pub fn start(&mut self) -> PipelineResult<()> {
        match self.state() {
            PipelineState::Halted => return Err(PipelineError::Halted),
            PipelineState::Running => return Ok(()),
            PipelineState::Idle => {}
        }
        if self.culler.is_none() {
            return Err(PipelineError::MissingStage("culler"));
        }
        if self.sorter.is_none() {
            return Err(PipelineError::MissingStage("sorter"));
        }
        if self.device.lock().is_none() {
            return Err(PipelineError::MissingStage("output device"));
        }
        if self.enter_running() {
            Ok(())
        } else {
            Err(PipelineError::Halted)
        }
    }

    /// Leave `Running` so stages can be rewired
    pub fn stop(&mut self) {
        if self.control.transition(PipelineState::Running, PipelineState::Idle) {
            log::info!("Render pipeline stopped");
        }
    }

    /// Cull, sort and draw one frame
    ///
    /// The first call moves an idle pipeline to `Running`. Pending request
    /// data is consumed whether or not anything is drawn.
    pub fn render(&mut self, graph: &SceneGraph, profiling: &mut ProfilingData) -> FrameStatus {
        if !self.enter_running() {
            return FrameStatus::Halted;
        }

        profiling.reset();
        profiling.frame_number += 1;
        let request = self.request.take().unwrap_or_default();

        if self.layers.is_empty() {
            return FrameStatus::Skipped;
        }

        self.control.enter_render();
        let status = self.run_frame(graph, &request, profiling);
        self.control.leave_render();
        self.finish_frame(status)
    }

    /// Finish disposal for a halt raised from inside the frame
    fn finish_frame(&self, status: FrameStatus) -> FrameStatus {
        if self.control.halt_flag().is_raised() {
            self.dispose_device();
            if status != FrameStatus::Terminated {
                return FrameStatus::Halted;
            }
        }
        status
    }

    fn enter_running(&self) -> bool {
        match self.state() {
            PipelineState::Halted => false,
            PipelineState::Running => true,
            PipelineState::Idle => {
                if self.control.transition(PipelineState::Idle, PipelineState::Running) {
                    log::info!("Render pipeline running");
                }
                self.state() == PipelineState::Running
            }
        }
    }

    fn run_frame(&mut self, graph: &SceneGraph, request: &RequestData, profiling: &mut ProfilingData) -> FrameStatus {
        let (Some(culler), Some(sorter)) = (self.culler.as_mut(), self.sorter.as_mut()) else {
            self.reporter.warning("Render pipeline is missing a cull or sort stage; frame skipped");
            return FrameStatus::Skipped;
        };

        let stopwatch = Stopwatch::start_new();
        let frame = culler.cull(graph, &self.layers, request, profiling);
        profiling.cull_time = stopwatch.elapsed();
        if self.control.halt_flag().is_raised() {
            return FrameStatus::Halted;
        }

        let stopwatch = Stopwatch::start_new();
        let frame = sorter.sort(frame);
        profiling.sort_time = stopwatch.elapsed();
        if self.control.halt_flag().is_raised() {
            return FrameStatus::Halted;
        }

        let mut slot = self.device.lock();
        let Some(device) = slot.as_mut() else {
            self.reporter.warning("Render pipeline has no output device; frame skipped");
            return FrameStatus::Skipped;
        };
        // Re-checked under the lock so a concurrent halt never races a draw
        if self.control.halt_flag().is_raised() {
            return FrameStatus::Halted;
        }

        device.set_frame(frame);
        let stopwatch = Stopwatch::start_new();
        let drawn = device.draw(profiling);
        profiling.draw_time = stopwatch.elapsed();
        let disposed = device.is_disposed();
        drop(slot);

        self.draw_outcome(drawn, disposed, profiling)
    }

    fn draw_outcome(&self, drawn: bool, disposed: bool, profiling: &ProfilingData) -> FrameStatus {
        if drawn {
            log::trace!(
                "Frame {}: {} renderables, {} triangles, {:?}",
                profiling.frame_number,
                profiling.num_renderables,
                profiling.num_triangles,
                profiling.frame_time()
            );
            FrameStatus::Drawn
        } else if self.control.halt_flag().is_raised() {
            FrameStatus::Halted
        } else if disposed {
            self.reporter
                .fatal_error(&format!("Output device lost during frame {}; halting pipeline", profiling.frame_number));
            if self.control.halt() {
                log::info!("Render pipeline halted");
            }
            FrameStatus::Terminated
        } else {
            self.reporter
                .warning(&format!("Transient draw failure in frame {}", profiling.frame_number));
            FrameStatus::DrawFailed
        }
    }

    /// Redraw the last frame without culling or sorting
    pub fn display_only(&mut self, profiling: &mut ProfilingData) -> FrameStatus {
        if self.is_halted() {
            return FrameStatus::Halted;
        }

        self.control.enter_render();
        let status = self.redraw(profiling);
        self.control.leave_render();
        self.finish_frame(status)
    }

    fn redraw(&mut self, profiling: &mut ProfilingData) -> FrameStatus {
        let mut slot = self.device.lock();
        let Some(device) = slot.as_mut() else {
            return FrameStatus::Skipped;
        };
        if self.control.halt_flag().is_raised() {
            return FrameStatus::Halted;
        }
        profiling.num_draw_calls = 0;
        let stopwatch = Stopwatch::start_new();
        let drawn = device.draw(profiling);
        profiling.draw_time = stopwatch.elapsed();
        let disposed = device.is_disposed();
        drop(slot);

        self.draw_outcome(drawn, disposed, profiling)
    }

    /// Present the drawn frame; does nothing once halted
    ///
    /// Returns whether buffers were swapped.
    pub fn swap_buffers(&mut self) -> bool {
        if self.is_halted() {
            return false;
        }
        let mut slot = self.device.lock();
        let Some(device) = slot.as_mut() else {
            return false;
        };
        if device.swap_buffers() {
            return true;
        }
        let disposed = device.is_disposed();
        drop(slot);

        if disposed && self.control.halt() {
            self.reporter.fatal_error("Output device lost during buffer swap; halting pipeline");
            log::info!("Render pipeline halted");
        }
        false
    }

    fn dispose_device(&self) {
        if let Some(device) = self.device.lock().as_mut() {
            device.dispose();
        }
    }
}
