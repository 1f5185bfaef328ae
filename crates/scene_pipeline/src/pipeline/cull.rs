//! Cull stages
//!
//! A cull stage walks every enabled layer's viewports, picks one child for
//! switch and LOD groups, composes transforms and flattens visible
//! renderables into a [`CulledFrame`]. Traversal uses a heap work stack and
//! checks the halt flag at every node.

use crate::foundation::math::{Mat4, Mat4Ext, Point3, Vec3};
use crate::pipeline::control::HaltFlag;
use crate::pipeline::profiling::{ProfilingData, RequestData};
use crate::pipeline::render_op::{CulledFrame, EnvironmentData, GraphicsDetails, RenderOp, RenderPass};
use crate::scene::{Frustum, Layer, NodeId, NodeKind, SceneGraph, Viewport};

/// Produces the frame's render ops from the scene graph
pub trait CullStage: Send {
    /// Flatten the visible part of the layers
    ///
    /// Never fails: unknown nodes are skipped and an empty layer list gives
    /// an empty frame.
    fn cull(
        &mut self,
        graph: &SceneGraph,
        layers: &[Layer],
        request: &RequestData,
        profiling: &mut ProfilingData,
    ) -> CulledFrame;

    /// Share the pipeline's cancellation flag
    fn bind_halt_flag(&mut self, flag: HaltFlag);

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Cull stage without visibility testing
///
/// Everything reachable is emitted; switch and LOD selection still apply.
#[derive(Debug, Default)]
pub struct NullCullStage {
    halt: HaltFlag,
}

impl NullCullStage {
    /// Create the stage
    pub fn new() -> Self {
        Self::default()
    }
}

impl CullStage for NullCullStage {
    fn cull(
        &mut self,
        graph: &SceneGraph,
        layers: &[Layer],
        request: &RequestData,
        profiling: &mut ProfilingData,
    ) -> CulledFrame {
        cull_layers(graph, layers, request, profiling, &self.halt, false)
    }

    fn bind_halt_flag(&mut self, flag: HaltFlag) {
        self.halt = flag;
    }

    fn name(&self) -> &'static str {
        "NullCullStage"
    }
}

/// Cull stage with frustum and LOD evaluation
///
/// Only nodes with box bounds outside the frustum are rejected. A shape with
/// null geometry bounds is treated as unbounded and always emitted, as long
/// as its ancestors pass.
#[derive(Debug)]
pub struct GenericCullStage {
    halt: HaltFlag,
    frustum_culling: bool,
}

impl GenericCullStage {
    /// Create the stage with frustum culling enabled
    pub fn new() -> Self {
        Self { halt: HaltFlag::new(), frustum_culling: true }
    }

    /// Enable or disable the frustum test
    pub fn with_frustum_culling(mut self, enabled: bool) -> Self {
        self.frustum_culling = enabled;
        self
    }
}

impl Default for GenericCullStage {
    fn default() -> Self {
        Self::new()
    }
}

impl CullStage for GenericCullStage {
    fn cull(
        &mut self,
        graph: &SceneGraph,
        layers: &[Layer],
        request: &RequestData,
        profiling: &mut ProfilingData,
    ) -> CulledFrame {
        let test_frustum = self.frustum_culling && !request.disable_culling;
        cull_layers(graph, layers, request, profiling, &self.halt, test_frustum)
    }

    fn bind_halt_flag(&mut self, flag: HaltFlag) {
        self.halt = flag;
    }

    fn name(&self) -> &'static str {
        "GenericCullStage"
    }
}

fn cull_layers(
    graph: &SceneGraph,
    layers: &[Layer],
    request: &RequestData,
    profiling: &mut ProfilingData,
    halt: &HaltFlag,
    test_frustum: bool,
) -> CulledFrame {
    let mut frame = CulledFrame::empty();
    for viewport in layers.iter().filter(|layer| layer.enabled).flat_map(|layer| layer.viewports.iter()) {
        if halt.is_raised() {
            break;
        }
        let environment = viewport_environment(graph, viewport);
        let frustum = test_frustum.then(|| Frustum::from_matrix(&(environment.projection * environment.view)));

        let mut traversal = Traversal {
            graph,
            frustum,
            viewer: environment.viewer_position(),
            forced_lod: request.forced_lod_level,
            halt,
            profiling: &mut *profiling,
            ops: Vec::new(),
        };
        traversal.run(viewport.scene.root);

        let ops = traversal.ops;
        frame.passes.push(RenderPass { environment, ops });
    }
    log::trace!(
        "Culled {} passes, {} renderables, {} triangles",
        frame.passes.len(),
        profiling.num_renderables,
        profiling.num_triangles
    );
    frame
}

fn viewport_environment(graph: &SceneGraph, viewport: &Viewport) -> EnvironmentData {
    let scene = &viewport.scene;
    let viewpoint_transform = match scene.active_viewpoint.map(|id| graph.world_transform(id)) {
        Some(Ok(transform)) => transform,
        Some(Err(e)) => {
            log::warn!("Ignoring active viewpoint: {}", e);
            Mat4::identity()
        }
        None => Mat4::identity(),
    };

    let background = scene.active_background.and_then(|id| match graph.kind(id) {
        Ok(NodeKind::Background { renderable }) => Some(renderable.clone()),
        _ => None,
    });

    EnvironmentData {
        viewport: (viewport.x, viewport.y, viewport.width, viewport.height),
        projection_type: scene.view_environment.projection,
        projection: scene.view_environment.projection_matrix(viewport.aspect_ratio()),
        view: viewpoint_transform.affine_inverse(),
        viewpoint_transform,
        background,
        fog: scene.fog,
    }
}

struct Traversal<'a> {
    graph: &'a SceneGraph,
    frustum: Option<Frustum>,
    viewer: Vec3,
    forced_lod: Option<usize>,
    halt: &'a HaltFlag,
    profiling: &'a mut ProfilingData,
    ops: Vec<RenderOp>,
}

/// Pending traversal work
enum Step {
    /// Visit a node; `scope` is the transform from the enclosing START
    /// scope to the node's parent, `world` the parent's world transform
    Visit { id: NodeId, scope: Mat4, world: Mat4 },
    /// Close an effect scope opened at op index `opened`
    CloseEffect { opened: usize, details: GraphicsDetails },
}

impl Traversal<'_> {
    /// Flatten the subtree under `root` depth first
    ///
    /// Work is kept on an explicit stack so deep graphs cannot exhaust the
    /// render thread's stack.
    fn run(&mut self, root: NodeId) {
        let mut stack = vec![Step::Visit { id: root, scope: Mat4::identity(), world: Mat4::identity() }];
        while let Some(step) = stack.pop() {
            if self.halt.is_raised() {
                return;
            }
            match step {
                Step::Visit { id, scope, world } => self.visit(id, scope, world, &mut stack),
                Step::CloseEffect { opened, details } => {
                    // Scoped state with nothing to apply to is dropped
                    if self.ops.len() == opened + 1 {
                        self.ops.pop();
                    } else {
                        self.ops.push(RenderOp::Stop(details));
                    }
                }
            }
        }
    }

    fn visit(&mut self, id: NodeId, scope: Mat4, world: Mat4, stack: &mut Vec<Step>) {
        let graph = self.graph;
        let Ok(node) = graph.node(id) else {
            log::debug!("Cull skipped unknown node {:?}", id);
            return;
        };

        // Null bounds have no extent to test; only boxes are rejected
        if let Some(frustum) = &self.frustum {
            let bounds = graph.bounds(id).unwrap_or_default().transformed(&world);
            if let Some(aabb) = bounds.aabb() {
                if !frustum.intersects_aabb(aabb) {
                    return;
                }
            }
        }

        let push_children = |stack: &mut Vec<Step>, children: &[NodeId], scope: Mat4, world: Mat4| {
            stack.extend(children.iter().rev().map(|&id| Step::Visit { id, scope, world }));
        };

        match node.kind() {
            NodeKind::Group | NodeKind::SharedGroup => push_children(stack, node.children(), scope, world),
            NodeKind::TransformGroup { transform } => {
                push_children(stack, node.children(), scope * transform, world * transform);
            }
            NodeKind::Switch { active } => {
                if let Some(&child) = active.and_then(|index| node.children().get(index)) {
                    stack.push(Step::Visit { id: child, scope, world });
                }
            }
            NodeKind::Lod(lod) => {
                let count = node.children().len();
                let level = match self.forced_lod {
                    Some(level) if count > 0 => Some(level.min(count - 1)),
                    _ => {
                        let center = world.transform_point(&Point3::from(lod.center)).coords;
                        lod.select((center - self.viewer).magnitude(), count)
                    }
                };
                if let Some(&child) = level.and_then(|index| node.children().get(index)) {
                    stack.push(Step::Visit { id: child, scope, world });
                }
            }
            NodeKind::Shape(shape) => {
                let Some(renderable) = &shape.renderable else {
                    return;
                };
                let details = GraphicsDetails {
                    transform: scope,
                    world_transform: world,
                    renderable: renderable.clone(),
                    node: id,
                    triangle_count: shape.triangle_count,
                    transparent: shape.transparent,
                    state_key: shape.state_key,
                    distance: self.distance_to(shape.geometry_bounds.center(), &world),
                };
                self.profiling.num_renderables += 1;
                self.profiling.num_triangles += u64::from(shape.triangle_count);
                self.ops.push(RenderOp::Start(details.clone()));
                self.ops.push(RenderOp::Stop(details));
            }
            NodeKind::Effect { renderable } => {
                let center = graph.bounds(id).ok().and_then(|b| b.center());
                let details = GraphicsDetails {
                    transform: scope,
                    world_transform: world,
                    renderable: renderable.clone(),
                    node: id,
                    triangle_count: 0,
                    transparent: false,
                    state_key: 0,
                    distance: self.distance_to(center, &world),
                };
                let opened = self.ops.len();
                self.ops.push(RenderOp::Start(details.clone()));
                stack.push(Step::CloseEffect { opened, details });
                push_children(stack, node.children(), Mat4::identity(), world);
            }
            NodeKind::Viewpoint | NodeKind::Background { .. } => {}
        }
    }

    fn distance_to(&self, local_center: Option<Vec3>, world: &Mat4) -> f32 {
        let center = local_center.unwrap_or_else(Vec3::zeros);
        let center = world.transform_point(&Point3::from(center)).coords;
        (center - self.viewer).magnitude()
    }
}
