//! Output device abstraction
//!
//! The pipeline treats the graphics API as an opaque sink. An
//! [`OutputDevice`] receives the sorted frame and issues it to a
//! [`GraphicsContext`]; leaf drawables implement [`Renderable`] and are
//! called back in matched render/post-render pairs.

mod processor;
mod recording;

pub use processor::RenderingProcessor;
pub use recording::{GraphicsCommand, RecordingContext, RecordingHandle};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::foundation::math::Mat4;
use crate::pipeline::control::HaltFlag;
use crate::pipeline::error::DeviceError;
use crate::pipeline::profiling::ProfilingData;
use crate::pipeline::render_op::{CulledFrame, EnvironmentData};
use crate::scene::NodeId;

bitflags::bitflags! {
    /// Features requested from the native context
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CapabilityFlags: u32 {
        /// Separate front and back buffers
        const DOUBLE_BUFFERED = 1 << 0;
        /// Hardware accelerated context
        const HARDWARE_ACCELERATED = 1 << 1;
        /// Left and right eye buffers
        const STEREO = 1 << 2;
    }
}

/// Capabilities the output device is created with
///
/// Fixed at construction; a device never renegotiates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphicsCapabilities {
    /// Requested features
    pub features: CapabilityFlags,
    /// Colour buffer bits per pixel
    pub color_bits: u8,
    /// Depth buffer bits
    pub depth_bits: u8,
    /// Stencil buffer bits
    pub stencil_bits: u8,
}

impl Default for GraphicsCapabilities {
    fn default() -> Self {
        Self {
            features: CapabilityFlags::DOUBLE_BUFFERED | CapabilityFlags::HARDWARE_ACCELERATED,
            color_bits: 24,
            depth_bits: 24,
            stencil_bits: 8,
        }
    }
}

impl GraphicsCapabilities {
    /// Whether double buffering was requested
    pub fn is_double_buffered(&self) -> bool {
        self.features.contains(CapabilityFlags::DOUBLE_BUFFERED)
    }
}

/// Native graphics context driven by a rendering processor
pub trait GraphicsContext: Send {
    /// Create native resources for the requested capabilities
    fn initialize(&mut self, capabilities: &GraphicsCapabilities) -> Result<(), DeviceError>;

    /// Bind the context to the calling thread before drawing
    fn make_current(&mut self) -> Result<(), DeviceError>;

    /// Release the context after drawing
    fn release_current(&mut self);

    /// Set viewport, projection, fog and clear for a pass
    fn begin_pass(&mut self, environment: &EnvironmentData);

    /// Finish a pass
    fn end_pass(&mut self);

    /// Replace the current model-view matrix
    fn load_matrix(&mut self, matrix: &Mat4);

    /// Issue a draw command for a primitive set
    fn draw(&mut self, label: &str, triangle_count: u32);

    /// Open a debug group around one renderable's callbacks
    fn push_debug_group(&mut self, _node: Option<NodeId>) {}

    /// Close the innermost debug group
    fn pop_debug_group(&mut self) {}

    /// Take the error raised by the last frame, if any
    ///
    /// Errors reported here are transient; a lost context is reported by
    /// [`Self::is_lost`] instead.
    fn take_error(&mut self) -> Option<String>;

    /// Present the back buffer
    fn swap_buffers(&mut self) -> Result<(), DeviceError>;

    /// Whether the native context has been destroyed
    fn is_lost(&self) -> bool;

    /// Free native resources
    fn dispose(&mut self);
}

/// State handed to renderable callbacks
pub struct RenderContext<'a> {
    /// Context to issue commands on
    pub graphics: &'a mut dyn GraphicsContext,
    /// Model-view matrix already loaded on the context
    pub model_view: Mat4,
    /// Environment of the current pass
    pub environment: &'a EnvironmentData,
    /// Node that produced the call; `None` for backgrounds
    pub node: Option<NodeId>,
}

impl fmt::Debug for RenderContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("model_view", &self.model_view)
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

/// Drawable callbacks invoked by the output device
///
/// `render` and `post_render` are called in matched pairs, once per visible
/// instance per frame, in traversal order. For grouping state such as
/// lights, `post_render` runs after the whole subtree.
pub trait Renderable: fmt::Debug + Send + Sync {
    /// Issue draw commands or set state
    fn render(&self, ctx: &mut RenderContext<'_>);

    /// Undo state set by `render`
    fn post_render(&self, _ctx: &mut RenderContext<'_>) {}
}

/// Shared handle to a renderable
pub type RenderableHandle = Arc<dyn Renderable>;

/// Renderable that draws nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRenderable;

impl Renderable for NullRenderable {
    fn render(&self, _ctx: &mut RenderContext<'_>) {}
}

/// Renderable issuing one labelled draw command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimitiveRenderable {
    /// Label passed to the context
    pub label: String,
    /// Triangles drawn
    pub triangle_count: u32,
}

impl PrimitiveRenderable {
    /// Create a primitive renderable
    pub fn new(label: impl Into<String>, triangle_count: u32) -> Self {
        Self { label: label.into(), triangle_count }
    }
}

impl Renderable for PrimitiveRenderable {
    fn render(&self, ctx: &mut RenderContext<'_>) {
        ctx.graphics.draw(&self.label, self.triangle_count);
    }
}

/// Sink for sorted frames
///
/// After [`Self::dispose`] every call is a no-op and `draw` returns false.
pub trait OutputDevice: Send {
    /// Capabilities fixed at construction
    fn capabilities(&self) -> &GraphicsCapabilities;

    /// Replace the frame drawn by the next [`Self::draw`]
    fn set_frame(&mut self, frame: CulledFrame);

    /// Draw the current frame; false when drawing failed
    fn draw(&mut self, profiling: &mut ProfilingData) -> bool;

    /// Present the drawn frame
    fn swap_buffers(&mut self) -> bool;

    /// Share the pipeline's cancellation flag
    fn bind_halt_flag(&mut self, flag: HaltFlag);

    /// Release native resources; later calls do nothing
    fn dispose(&mut self);

    /// Whether the device is permanently unusable
    fn is_disposed(&self) -> bool;
}
