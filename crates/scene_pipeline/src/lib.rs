//! # Scene Pipeline
//!
//! A retained-mode scene graph with a cull, sort and draw render pipeline.
//!
//! ## Features
//!
//! - **Arena Scene Graph**: Slot map nodes with shared groups and lazy bounds
//! - **Update Barrier**: Writes to live nodes apply once per frame, between frames
//! - **Cull Stages**: Frustum, switch and LOD evaluation into flat render ops
//! - **Sort Stages**: Stable depth and render-state ordering
//! - **Output Device**: Matrix-stack rendering processor over a graphics context
//! - **Render Thread**: Channel-driven frame loop with cooperative halt
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scene_pipeline::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = PipelineSettings::default();
//!     let device = settings.create_device(RecordingContext::new())?;
//!     let pipeline = settings.build_pipeline(Box::new(device))?;
//!
//!     let mut graph = SceneGraph::new();
//!     let root = graph.create_group();
//!     let cube = graph.create_shape(Shape::new(
//!         Arc::new(PrimitiveRenderable::new("cube", 12)),
//!         Bounds::from_corners(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0)),
//!     ));
//!     let _ = graph.add_child(root, cube)?;
//!
//!     let mut render_loop = RenderLoop::new(graph, pipeline);
//!     render_loop.set_layers(vec![Layer::single(Viewport::new(0, 0, 800, 600, Scene::new(root)))]);
//!     render_loop.run_frame();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod foundation;
pub mod config;
pub mod scene;
pub mod pipeline;

/// Common imports for pipeline users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, CullMode, PipelineSettings, SortMode},
        foundation::{
            math::{Mat4, Mat4Ext, Vec3},
            time::{FrameLimiter, Stopwatch},
        },
        pipeline::{
            ErrorReporter, FrameStatus, GraphicsCapabilities, GraphicsContext, HaltHandle, OutputDevice,
            PrimitiveRenderable, ProfilingData, RecordingContext, RenderContext, RenderLoop, RenderManager,
            RenderPipeline, Renderable, RenderableHandle, RequestData, UpdateObserver,
        },
        scene::{
            Bounds, Layer, LevelOfDetail, Mutation, NodeId, NodeKind, Scene, SceneError, SceneGraph, Shape,
            UpdateHandle, Viewport,
        },
    };
}
