//! Render pipeline
//!
//! Per frame, a synchronous call chain on the render thread:
//!
//! ```text
//! Update barrier (observer + queued scene changes)
//!      ↓
//! CullStage   -> CulledFrame (START/STOP render ops per viewport)
//!      ↓
//! SortStage   -> reordered CulledFrame
//!      ↓
//! OutputDevice (push / multiply / render / post-render / pop)
//!      ↓
//! swap buffers
//! ```
//!
//! [`RenderPipeline`] owns the stages and the `Idle -> Running -> Halted`
//! state machine, [`RenderLoop`] adds the update barrier and
//! [`RenderManager`] runs the loop on a dedicated thread.

mod control;
mod cull;
mod device;
mod error;
mod manager;
mod orchestrator;
mod profiling;
mod render_loop;
mod render_op;
mod sort;


pub use control::{HaltFlag, PipelineState};
pub use cull::{CullStage, GenericCullStage, NullCullStage};
pub use device::{
    CapabilityFlags, GraphicsCapabilities, GraphicsCommand, GraphicsContext, NullRenderable, OutputDevice,
    PrimitiveRenderable, RecordingContext, RecordingHandle, RenderContext, Renderable, RenderableHandle,
    RenderingProcessor,
};
pub use error::{
    CollectingErrorReporter, DeviceError, ErrorReporter, LogErrorReporter, PipelineError, PipelineResult, Severity,
};
pub use manager::{RenderCommand, RenderManager};
pub use orchestrator::{FrameStatus, HaltHandle, RenderPipeline};
pub use profiling::{ProfilingData, RequestData};
pub use render_loop::{RenderLoop, UpdateObserver};
pub use render_op::{is_well_paired, CulledFrame, EnvironmentData, GraphicsDetails, RenderOp, RenderPass};
pub use sort::{DepthSortStage, NullSortStage, SortStage, StateSortStage};
