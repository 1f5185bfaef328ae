//! Cull output
//!
//! The cull stage flattens the visible part of the graph into a sequence of
//! [`RenderOp`]s: a depth-first linearization in which every
//! [`RenderOp::Start`] is closed by a later [`RenderOp::Stop`] for the same
//! node. Shapes produce an adjacent pair; effect groups open before their
//! subtree and close after it. A frame is an immutable snapshot and only
//! refers back to the graph through opaque renderable handles.

use crate::foundation::math::{Mat4, Vec3};
use crate::pipeline::RenderableHandle;
use crate::scene::{Fog, NodeId, ProjectionType};

/// Drawable entry carried by a render op
#[derive(Debug, Clone)]
pub struct GraphicsDetails {
    /// Transform relative to the enclosing START scope
    pub transform: Mat4,
    /// Object-to-world transform, used for depth sorting
    pub world_transform: Mat4,
    /// Callbacks invoked by the output device
    pub renderable: RenderableHandle,
    /// Node that produced the entry
    pub node: NodeId,
    /// Triangles drawn by this entry
    pub triangle_count: u32,
    /// Needs blending
    pub transparent: bool,
    /// Render state grouping key
    pub state_key: u64,
    /// Distance from the viewer to the bounds center
    pub distance: f32,
}

/// One entry of the flattened cull output
#[derive(Debug, Clone)]
pub enum RenderOp {
    /// Push the transform and render
    Start(GraphicsDetails),
    /// Post-render and pop the transform
    Stop(GraphicsDetails),
}

impl RenderOp {
    /// Details carried by the op
    pub fn details(&self) -> &GraphicsDetails {
        match self {
            Self::Start(details) | Self::Stop(details) => details,
        }
    }

    /// Whether this opens a scope
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start(_))
    }
}

/// Per-viewport environment shared by a run of ops
#[derive(Debug, Clone)]
pub struct EnvironmentData {
    /// Viewport rectangle `(x, y, width, height)` in pixels
    pub viewport: (u32, u32, u32, u32),
    /// Projection kind the matrix was built from
    pub projection_type: ProjectionType,
    /// Projection matrix
    pub projection: Mat4,
    /// World-to-view matrix
    pub view: Mat4,
    /// Viewpoint world transform
    pub viewpoint_transform: Mat4,
    /// Active background callbacks
    pub background: Option<RenderableHandle>,
    /// Active fog
    pub fog: Option<Fog>,
}

impl EnvironmentData {
    /// Viewer position in world space
    pub fn viewer_position(&self) -> Vec3 {
        let m = &self.viewpoint_transform;
        Vec3::new(m.m14, m.m24, m.m34)
    }
}

/// Ops of one viewport
#[derive(Debug, Clone)]
pub struct RenderPass {
    /// Environment applying to every op in the pass
    pub environment: EnvironmentData,
    /// Ops in draw order
    pub ops: Vec<RenderOp>,
}

/// Everything one frame draws, in layer then viewport order
#[derive(Debug, Clone, Default)]
pub struct CulledFrame {
    /// Passes in draw order; earlier passes are drawn underneath later ones
    pub passes: Vec<RenderPass>,
}

impl CulledFrame {
    /// Frame with no passes
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether nothing is drawn
    pub fn is_empty(&self) -> bool {
        self.passes.iter().all(|pass| pass.ops.is_empty())
    }

    /// Total number of ops across passes
    pub fn op_count(&self) -> usize {
        self.passes.iter().map(|pass| pass.ops.len()).sum()
    }

    /// Number of START ops
    pub fn start_count(&self) -> usize {
        self.passes
            .iter()
            .flat_map(|pass| pass.ops.iter())
            .filter(|op| op.is_start())
            .count()
    }

    /// Whether every pass is properly paired
    pub fn is_well_formed(&self) -> bool {
        self.passes.iter().all(|pass| is_well_paired(&pass.ops))
    }
}

/// Stack scan over a sequence: pushes on START, pops on STOP
///
/// Fails on underflow, on a STOP closing a different node than the innermost
/// START, and on a non-empty stack at the end.
pub fn is_well_paired(ops: &[RenderOp]) -> bool {
    let mut open: Vec<NodeId> = Vec::new();
    for op in ops {
        match op {
            RenderOp::Start(details) => open.push(details.node),
            RenderOp::Stop(details) => {
                if open.pop() != Some(details.node) {
                    return false;
                }
            }
        }
    }
    open.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::NullRenderable;
    use crate::scene::{NodeKind, SceneGraph};
    use std::sync::Arc;

    fn details(node: NodeId) -> GraphicsDetails {
        GraphicsDetails {
            transform: Mat4::identity(),
            world_transform: Mat4::identity(),
            renderable: Arc::new(NullRenderable),
            node,
            triangle_count: 0,
            transparent: false,
            state_key: 0,
            distance: 0.0,
        }
    }

    #[test]
    fn test_pairing_scan() {
        let mut graph = SceneGraph::new();
        let a = graph.create_node(NodeKind::Group);
        let b = graph.create_node(NodeKind::Group);

        let nested = vec![
            RenderOp::Start(details(a)),
            RenderOp::Start(details(b)),
            RenderOp::Stop(details(b)),
            RenderOp::Stop(details(a)),
        ];
        assert!(is_well_paired(&nested));
        assert!(is_well_paired(&[]));

        let crossed = vec![
            RenderOp::Start(details(a)),
            RenderOp::Start(details(b)),
            RenderOp::Stop(details(a)),
            RenderOp::Stop(details(b)),
        ];
        assert!(!is_well_paired(&crossed));

        assert!(!is_well_paired(&[RenderOp::Stop(details(a))]));
        assert!(!is_well_paired(&[RenderOp::Start(details(a))]));
    }
}
