//! Graphics context that records commands instead of drawing
//!
//! Used headless by the viewer and as the test double for the rendering
//! processor. A [`RecordingHandle`] shares the command log and can inject
//! transient errors or context loss from another thread.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::foundation::math::Mat4;
use crate::pipeline::device::{CapabilityFlags, GraphicsCapabilities, GraphicsContext};
use crate::pipeline::error::DeviceError;
use crate::pipeline::render_op::EnvironmentData;
use crate::scene::NodeId;

/// One recorded context call
#[derive(Debug, Clone, PartialEq)]
pub enum GraphicsCommand {
    /// Native resources created
    Initialize,
    /// Context bound for drawing
    MakeCurrent,
    /// Context released after drawing
    ReleaseCurrent,
    /// Pass started for a viewport rectangle
    BeginPass((u32, u32, u32, u32)),
    /// Pass finished
    EndPass,
    /// Model-view matrix loaded
    LoadMatrix(Mat4),
    /// Primitive drawn
    Draw {
        /// Label passed by the renderable
        label: String,
        /// Triangles drawn
        triangle_count: u32,
    },
    /// Render callback about to run
    Render(Option<NodeId>),
    /// Post-render callback finished
    PostRender,
    /// Buffers presented
    Swap,
    /// Native resources freed
    Dispose,
}

#[derive(Debug)]
struct RecordingState {
    commands: Vec<GraphicsCommand>,
    pending_error: Option<String>,
    lost: bool,
    unsupported: CapabilityFlags,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            pending_error: None,
            lost: false,
            unsupported: CapabilityFlags::empty(),
        }
    }
}

/// Shared view of a recording context
#[derive(Debug, Clone)]
pub struct RecordingHandle {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingHandle {
    /// Copy of the command log
    pub fn commands(&self) -> Vec<GraphicsCommand> {
        self.state.lock().commands.clone()
    }

    /// Clear the command log
    pub fn clear(&self) {
        self.state.lock().commands.clear();
    }

    /// Labels of every draw command, in order
    pub fn draw_labels(&self) -> Vec<String> {
        self.state
            .lock()
            .commands
            .iter()
            .filter_map(|command| match command {
                GraphicsCommand::Draw { label, .. } => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded commands matching a predicate
    pub fn count(&self, predicate: impl Fn(&GraphicsCommand) -> bool) -> usize {
        self.state.lock().commands.iter().filter(|command| predicate(command)).count()
    }

    /// Report a transient error at the end of the next frame
    pub fn fail_next_frame(&self, message: impl Into<String>) {
        self.state.lock().pending_error = Some(message.into());
    }

    /// Simulate destruction of the native context
    pub fn lose_context(&self) {
        self.state.lock().lost = true;
    }
}

/// Headless graphics context
#[derive(Debug)]
pub struct RecordingContext {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingContext {
    /// Create a context supporting every capability
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(RecordingState::default())) }
    }

    /// Create a context that refuses the given features at initialization
    pub fn without_features(unsupported: CapabilityFlags) -> Self {
        let context = Self::new();
        context.state.lock().unsupported = unsupported;
        context
    }

    /// Handle sharing this context's log
    pub fn handle(&self) -> RecordingHandle {
        RecordingHandle { state: Arc::clone(&self.state) }
    }

    fn record(&self, command: GraphicsCommand) {
        self.state.lock().commands.push(command);
    }
}

impl Default for RecordingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsContext for RecordingContext {
    fn initialize(&mut self, capabilities: &GraphicsCapabilities) -> Result<(), DeviceError> {
        let refused = self.state.lock().unsupported & capabilities.features;
        if !refused.is_empty() {
            return Err(DeviceError::ContextCreation(format!("unsupported features {refused:?}")));
        }
        self.record(GraphicsCommand::Initialize);
        Ok(())
    }

    fn make_current(&mut self) -> Result<(), DeviceError> {
        if self.state.lock().lost {
            return Err(DeviceError::ContextLost);
        }
        self.record(GraphicsCommand::MakeCurrent);
        Ok(())
    }

    fn release_current(&mut self) {
        self.record(GraphicsCommand::ReleaseCurrent);
    }

    fn begin_pass(&mut self, environment: &EnvironmentData) {
        self.record(GraphicsCommand::BeginPass(environment.viewport));
    }

    fn end_pass(&mut self) {
        self.record(GraphicsCommand::EndPass);
    }

    fn load_matrix(&mut self, matrix: &Mat4) {
        self.record(GraphicsCommand::LoadMatrix(*matrix));
    }

    fn draw(&mut self, label: &str, triangle_count: u32) {
        self.record(GraphicsCommand::Draw { label: label.to_string(), triangle_count });
    }

    fn push_debug_group(&mut self, node: Option<NodeId>) {
        self.record(GraphicsCommand::Render(node));
    }

    fn pop_debug_group(&mut self) {
        self.record(GraphicsCommand::PostRender);
    }

    fn take_error(&mut self) -> Option<String> {
        self.state.lock().pending_error.take()
    }

    fn swap_buffers(&mut self) -> Result<(), DeviceError> {
        if self.state.lock().lost {
            return Err(DeviceError::ContextLost);
        }
        self.record(GraphicsCommand::Swap);
        Ok(())
    }

    fn is_lost(&self) -> bool {
        self.state.lock().lost
    }

    fn dispose(&mut self) {
        self.record(GraphicsCommand::Dispose);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refuses_unsupported_features() {
        let mut context = RecordingContext::without_features(CapabilityFlags::STEREO);
        let mut capabilities = GraphicsCapabilities::default();
        assert!(context.initialize(&capabilities).is_ok());

        capabilities.features |= CapabilityFlags::STEREO;
        assert!(matches!(context.initialize(&capabilities), Err(DeviceError::ContextCreation(_))));
    }

    #[test]
    fn test_injected_failures() {
        let mut context = RecordingContext::new();
        let handle = context.handle();

        handle.fail_next_frame("bad enum");
        assert_eq!(context.take_error().as_deref(), Some("bad enum"));
        assert_eq!(context.take_error(), None);

        handle.lose_context();
        assert!(context.is_lost());
        assert_eq!(context.make_current(), Err(DeviceError::ContextLost));
    }
}
