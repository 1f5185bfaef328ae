//! Rendering processor
//!
//! Walks a sorted frame and drives a [`GraphicsContext`] with a matrix
//! stack: START pushes the parent matrix times the op's transform and
//! renders, STOP post-renders and pops. Transforms therefore compose down
//! the traversal and are undone on the way back up.

use std::fmt;

use crate::foundation::math::{Mat4, Mat4Ext};
use crate::pipeline::control::HaltFlag;
use crate::pipeline::device::{GraphicsCapabilities, GraphicsContext, OutputDevice, RenderContext};
use crate::pipeline::error::DeviceError;
use crate::pipeline::profiling::ProfilingData;
use crate::pipeline::render_op::{CulledFrame, RenderOp, RenderPass};

/// Output device backed by a graphics context
pub struct RenderingProcessor<C: GraphicsContext> {
    context: C,
    capabilities: GraphicsCapabilities,
    frame: CulledFrame,
    matrix_stack: Vec<Mat4>,
    halt: HaltFlag,
    disposed: bool,
}

impl<C: GraphicsContext> fmt::Debug for RenderingProcessor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderingProcessor")
            .field("capabilities", &self.capabilities)
            .field("passes", &self.frame.passes.len())
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl<C: GraphicsContext> RenderingProcessor<C> {
    /// Create the processor and the context's native resources
    pub fn new(mut context: C, capabilities: GraphicsCapabilities) -> Result<Self, DeviceError> {
        context.initialize(&capabilities)?;
        log::info!(
            "Output device created: {:?}, color {} / depth {} / stencil {} bits",
            capabilities.features,
            capabilities.color_bits,
            capabilities.depth_bits,
            capabilities.stencil_bits
        );

        Ok(Self {
            context,
            capabilities,
            frame: CulledFrame::empty(),
            matrix_stack: Vec::new(),
            halt: HaltFlag::new(),
            disposed: false,
        })
    }

    /// The frame the next draw issues
    pub fn frame(&self) -> &CulledFrame {
        &self.frame
    }

    /// The wrapped context
    pub fn context(&self) -> &C {
        &self.context
    }

    fn draw_pass(&mut self, pass: &RenderPass, profiling: &mut ProfilingData) -> Result<(), DeviceError> {
        let environment = &pass.environment;
        self.context.begin_pass(environment);

        // Backgrounds follow the view orientation but never its position
        if let Some(background) = &environment.background {
            let model_view = environment.view.rotation_only();
            self.context.load_matrix(&model_view);
            self.context.push_debug_group(None);
            let mut ctx = RenderContext { graphics: &mut self.context, model_view, environment, node: None };
            background.render(&mut ctx);
            background.post_render(&mut ctx);
            self.context.pop_debug_group();
        }

        self.matrix_stack.clear();
        self.matrix_stack.push(environment.view);

        let mut result = Ok(());
        for op in &pass.ops {
            if self.halt.is_raised() {
                break;
            }
            match op {
                RenderOp::Start(details) => {
                    let parent = self.matrix_stack.last().copied().unwrap_or(environment.view);
                    let model_view = parent * details.transform;
                    self.matrix_stack.push(model_view);
                    self.context.load_matrix(&model_view);
                    self.context.push_debug_group(Some(details.node));

                    let mut ctx = RenderContext {
                        graphics: &mut self.context,
                        model_view,
                        environment,
                        node: Some(details.node),
                    };
                    details.renderable.render(&mut ctx);
                    profiling.num_draw_calls += 1;
                }
                RenderOp::Stop(details) => {
                    // The view matrix at the bottom is never popped
                    if self.matrix_stack.len() < 2 {
                        result = Err(DeviceError::TransformStackUnderflow);
                        break;
                    }
                    let model_view = self.matrix_stack.last().copied().unwrap_or(environment.view);
                    let mut ctx = RenderContext {
                        graphics: &mut self.context,
                        model_view,
                        environment,
                        node: Some(details.node),
                    };
                    details.renderable.post_render(&mut ctx);
                    self.context.pop_debug_group();

                    self.matrix_stack.pop();
                    if let Some(restored) = self.matrix_stack.last() {
                        self.context.load_matrix(restored);
                    }
                }
            }
        }

        self.context.end_pass();
        result
    }
}

impl<C: GraphicsContext> OutputDevice for RenderingProcessor<C> {
    fn capabilities(&self) -> &GraphicsCapabilities {
        &self.capabilities
    }

    fn set_frame(&mut self, frame: CulledFrame) {
        if !self.disposed {
            self.frame = frame;
        }
    }

    fn draw(&mut self, profiling: &mut ProfilingData) -> bool {
        if self.disposed {
            return false;
        }
        if self.context.is_lost() {
            log::info!("Graphics context lost; disposing output device");
            self.dispose();
            return false;
        }

        match self.context.make_current() {
            Ok(()) => {}
            Err(DeviceError::ContextLost) => {
                log::info!("Graphics context lost; disposing output device");
                self.dispose();
                return false;
            }
            Err(e) => {
                log::warn!("Could not make context current: {}", e);
                return false;
            }
        }

        let frame = std::mem::take(&mut self.frame);
        let mut success = true;
        for pass in &frame.passes {
            if self.halt.is_raised() {
                break;
            }
            if let Err(e) = self.draw_pass(pass, profiling) {
                log::warn!("Draw pass aborted: {}", e);
                success = false;
                break;
            }
        }
        self.frame = frame;

        self.context.release_current();
        if let Some(message) = self.context.take_error() {
            log::warn!("Graphics error during draw: {}", message);
            success = false;
        }
        success
    }

    fn swap_buffers(&mut self) -> bool {
        if self.disposed || !self.capabilities.is_double_buffered() {
            return !self.disposed;
        }
        match self.context.swap_buffers() {
            Ok(()) => true,
            Err(DeviceError::ContextLost) => {
                log::info!("Graphics context lost during swap; disposing output device");
                self.dispose();
                false
            }
            Err(e) => {
                log::warn!("Swap failed: {}", e);
                false
            }
        }
    }

    fn bind_halt_flag(&mut self, flag: HaltFlag) {
        self.halt = flag;
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.frame = CulledFrame::empty();
        self.matrix_stack.clear();
        self.context.dispose();
        log::info!("Output device disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::device::{GraphicsCommand, PrimitiveRenderable, RecordingContext, RecordingHandle, RenderableHandle};
    use crate::pipeline::render_op::{EnvironmentData, GraphicsDetails};
    use crate::scene::{NodeId, NodeKind, ProjectionType, SceneGraph};
    use std::sync::Arc;

    fn environment(background: Option<RenderableHandle>) -> EnvironmentData {
        EnvironmentData {
            viewport: (0, 0, 320, 240),
            projection_type: ProjectionType::default(),
            projection: Mat4::identity(),
            view: Mat4::translation(0.0, 0.0, -5.0),
            viewpoint_transform: Mat4::translation(0.0, 0.0, 5.0),
            background,
            fog: None,
        }
    }

    fn details(node: NodeId, label: &str, transform: Mat4) -> GraphicsDetails {
        GraphicsDetails {
            transform,
            world_transform: transform,
            renderable: Arc::new(PrimitiveRenderable::new(label, 12)),
            node,
            triangle_count: 12,
            transparent: false,
            state_key: 0,
            distance: 0.0,
        }
    }

    fn processor() -> (RenderingProcessor<RecordingContext>, RecordingHandle) {
        let context = RecordingContext::new();
        let handle = context.handle();
        let processor = RenderingProcessor::new(context, GraphicsCapabilities::default()).unwrap();
        handle.clear();
        (processor, handle)
    }

    #[test]
    fn test_nested_scopes_compose_and_restore_matrices() {
        let mut graph = SceneGraph::new();
        let effect = graph.create_node(NodeKind::Group);
        let shape = graph.create_node(NodeKind::Group);
        let effect_details = details(effect, "light", Mat4::translation(1.0, 0.0, 0.0));
        let shape_details = details(shape, "box", Mat4::translation(0.0, 2.0, 0.0));

        let (mut processor, handle) = processor();
        processor.set_frame(CulledFrame {
            passes: vec![RenderPass {
                environment: environment(None),
                ops: vec![
                    RenderOp::Start(effect_details.clone()),
                    RenderOp::Start(shape_details.clone()),
                    RenderOp::Stop(shape_details),
                    RenderOp::Stop(effect_details),
                ],
            }],
        });

        let mut profiling = ProfilingData::default();
        assert!(processor.draw(&mut profiling));
        assert_eq!(profiling.num_draw_calls, 2);

        let view = Mat4::translation(0.0, 0.0, -5.0);
        let matrices: Vec<Mat4> = handle
            .commands()
            .into_iter()
            .filter_map(|command| match command {
                GraphicsCommand::LoadMatrix(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(
            matrices,
            vec![
                view * Mat4::translation(1.0, 0.0, 0.0),
                view * Mat4::translation(1.0, 2.0, 0.0),
                view * Mat4::translation(1.0, 0.0, 0.0),
                view,
            ]
        );
        assert_eq!(handle.draw_labels(), vec!["light".to_string(), "box".to_string()]);
    }

    #[test]
    fn test_background_drawn_first_without_translation() {
        let mut graph = SceneGraph::new();
        let shape = graph.create_node(NodeKind::Group);
        let shape_details = details(shape, "box", Mat4::identity());
        let background: RenderableHandle = Arc::new(PrimitiveRenderable::new("sky", 2));

        let (mut processor, handle) = processor();
        processor.set_frame(CulledFrame {
            passes: vec![RenderPass {
                environment: environment(Some(background)),
                ops: vec![RenderOp::Start(shape_details.clone()), RenderOp::Stop(shape_details)],
            }],
        });
        assert!(processor.draw(&mut ProfilingData::default()));

        assert_eq!(handle.draw_labels(), vec!["sky".to_string(), "box".to_string()]);
        let first_matrix = handle.commands().into_iter().find_map(|command| match command {
            GraphicsCommand::LoadMatrix(m) => Some(m),
            _ => None,
        });
        assert_eq!(first_matrix, Some(Mat4::identity()));
    }

    #[test]
    fn test_unbalanced_stop_fails_draw() {
        let mut graph = SceneGraph::new();
        let shape = graph.create_node(NodeKind::Group);
        let (mut processor, _handle) = processor();
        processor.set_frame(CulledFrame {
            passes: vec![RenderPass {
                environment: environment(None),
                ops: vec![RenderOp::Stop(details(shape, "box", Mat4::identity()))],
            }],
        });

        assert!(!processor.draw(&mut ProfilingData::default()));
        assert!(!processor.is_disposed());
    }

    #[test]
    fn test_transient_error_is_not_disposal() {
        let (mut processor, handle) = processor();
        handle.fail_next_frame("invalid operation");

        assert!(!processor.draw(&mut ProfilingData::default()));
        assert!(!processor.is_disposed());
        assert!(processor.draw(&mut ProfilingData::default()));
    }

    #[test]
    fn test_context_loss_disposes_once() {
        let (mut processor, handle) = processor();
        handle.lose_context();

        assert!(!processor.draw(&mut ProfilingData::default()));
        assert!(processor.is_disposed());
        processor.dispose();
        assert!(!processor.swap_buffers());
        assert_eq!(handle.count(|c| *c == GraphicsCommand::Dispose), 1);
    }

    #[test]
    fn test_frame_survives_for_redraw() {
        let mut graph = SceneGraph::new();
        let shape = graph.create_node(NodeKind::Group);
        let shape_details = details(shape, "box", Mat4::identity());
        let (mut processor, handle) = processor();
        processor.set_frame(CulledFrame {
            passes: vec![RenderPass {
                environment: environment(None),
                ops: vec![RenderOp::Start(shape_details.clone()), RenderOp::Stop(shape_details)],
            }],
        });

        assert!(processor.draw(&mut ProfilingData::default()));
        assert!(processor.draw(&mut ProfilingData::default()));
        assert_eq!(handle.draw_labels().len(), 2);
    }

    #[test]
    fn test_raised_halt_flag_stops_issuing_ops() {
        let mut graph = SceneGraph::new();
        let shape = graph.create_node(NodeKind::Group);
        let shape_details = details(shape, "box", Mat4::identity());
        let (mut processor, handle) = processor();
        let flag = HaltFlag::new();
        processor.bind_halt_flag(flag.clone());
        processor.set_frame(CulledFrame {
            passes: vec![RenderPass {
                environment: environment(None),
                ops: vec![RenderOp::Start(shape_details.clone()), RenderOp::Stop(shape_details)],
            }],
        });

        flag.raise();
        processor.draw(&mut ProfilingData::default());
        assert!(handle.draw_labels().is_empty());
    }
}
