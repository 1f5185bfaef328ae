//! Scene graph node kinds
//!
//! Every node kind is a variant of the closed [`NodeKind`] enum; fields are
//! reached through typed accessors rather than by name at runtime.

use std::cell::Cell;

use crate::foundation::math::{Mat4, Vec3};
use crate::pipeline::RenderableHandle;
use crate::scene::bounds::Bounds;
use crate::scene::NodeId;

/// Leaf drawable
#[derive(Debug, Clone, Default)]
pub struct Shape {
    /// Callback object invoked by the output device; a shape without one is
    /// skipped by the cull stage
    pub renderable: Option<RenderableHandle>,
    /// Geometry bounds in the shape's local frame
    pub geometry_bounds: Bounds,
    /// Triangle count reported to profiling
    pub triangle_count: u32,
    /// Needs blending; drawn after opaque geometry by depth-aware sorters
    pub transparent: bool,
    /// Render state grouping key (material, texture set); equal keys are
    /// batched by the state sorter
    pub state_key: u64,
}

impl Shape {
    /// Create an opaque shape
    pub fn new(renderable: RenderableHandle, geometry_bounds: Bounds) -> Self {
        Self {
            renderable: Some(renderable),
            geometry_bounds,
            ..Default::default()
        }
    }

    /// Set the triangle count
    pub fn with_triangles(mut self, triangle_count: u32) -> Self {
        self.triangle_count = triangle_count;
        self
    }

    /// Mark as transparent
    pub fn with_transparency(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    /// Set the state grouping key
    pub fn with_state_key(mut self, state_key: u64) -> Self {
        self.state_key = state_key;
        self
    }
}

/// Distance-selected level of detail
///
/// `ranges[i]` is the far boundary of level `i`: level `i` is used while the
/// viewer distance is at most `ranges[i]` and above every earlier boundary.
/// Distances past the last boundary select the last child.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelOfDetail {
    /// Center the distance is measured from, in the node's local frame
    pub center: Vec3,
    /// Far boundary of each level
    pub ranges: Vec<f32>,
}

impl LevelOfDetail {
    /// Create a level of detail description
    pub fn new(center: Vec3, ranges: Vec<f32>) -> Self {
        Self { center, ranges }
    }

    /// Pick the level for a viewer distance
    ///
    /// The first boundary at or beyond the distance wins, so a distance that
    /// sits exactly on a boundary, or inside overlapping ranges, resolves to
    /// the lower-indexed level. Returns `None` when there are no children.
    pub fn select(&self, distance: f32, child_count: usize) -> Option<usize> {
        if child_count == 0 {
            return None;
        }
        let level = self
            .ranges
            .iter()
            .position(|&boundary| distance <= boundary)
            .unwrap_or(self.ranges.len());
        Some(level.min(child_count - 1))
    }
}

/// Closed set of node kinds
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Plain grouping node
    Group,
    /// Group that may be referenced from several parents
    SharedGroup,
    /// Group applying a local transform to its children
    TransformGroup {
        /// Local transform
        transform: Mat4,
    },
    /// Leaf drawable
    Shape(Shape),
    /// Group rendering at most one child
    Switch {
        /// Index of the rendered child
        active: Option<usize>,
    },
    /// Group rendering one child picked by viewer distance
    Lod(LevelOfDetail),
    /// Scoped render state (lights, clip planes, local fog): rendered before
    /// its subtree and post-rendered after it
    Effect {
        /// State callbacks
        renderable: RenderableHandle,
    },
    /// Camera position; the view matrix is the inverse of its world transform
    Viewpoint,
    /// Environment backdrop drawn before the scene of a viewport
    Background {
        /// Backdrop callbacks
        renderable: RenderableHandle,
    },
}

impl NodeKind {
    /// Whether the kind can hold children
    pub fn is_grouping(&self) -> bool {
        matches!(
            self,
            Self::Group | Self::SharedGroup | Self::TransformGroup { .. } | Self::Switch { .. } | Self::Lod(_) | Self::Effect { .. }
        )
    }

    /// Whether several parents may reference a node of this kind
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::SharedGroup)
    }

    /// Short name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Group => "Group",
            Self::SharedGroup => "SharedGroup",
            Self::TransformGroup { .. } => "TransformGroup",
            Self::Shape(_) => "Shape",
            Self::Switch { .. } => "Switch",
            Self::Lod(_) => "Lod",
            Self::Effect { .. } => "Effect",
            Self::Viewpoint => "Viewpoint",
            Self::Background { .. } => "Background",
        }
    }

    /// Local transform, identity for kinds without one
    pub fn local_transform(&self) -> Mat4 {
        match self {
            Self::TransformGroup { transform } => *transform,
            _ => Mat4::identity(),
        }
    }

    /// Shape data, if this is a shape
    pub fn as_shape(&self) -> Option<&Shape> {
        match self {
            Self::Shape(shape) => Some(shape),
            _ => None,
        }
    }

    /// Level of detail data, if this is a LOD group
    pub fn as_lod(&self) -> Option<&LevelOfDetail> {
        match self {
            Self::Lod(lod) => Some(lod),
            _ => None,
        }
    }

    /// Active child index, if this is a switch
    pub fn active_child(&self) -> Option<Option<usize>> {
        match self {
            Self::Switch { active } => Some(*active),
            _ => None,
        }
    }
}

/// A node stored in the scene graph arena
#[derive(Debug)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) children: Vec<NodeId>,
    pub(crate) parents: Vec<NodeId>,
    pub(crate) bounds: Cell<Bounds>,
    pub(crate) bounds_dirty: Cell<bool>,
    pub(crate) live: bool,
    pub(crate) name: Option<String>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
            parents: Vec::new(),
            bounds: Cell::new(Bounds::Null),
            bounds_dirty: Cell::new(true),
            live: false,
            name: None,
        }
    }

    /// Node kind and its fields
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Children in traversal order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Parents referencing this node; more than one only for shared groups
    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    /// Whether the node is reachable from a registered layer
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Whether the cached bounds must be recomputed before use
    pub fn is_bounds_dirty(&self) -> bool {
        self.bounds_dirty.get()
    }

    /// Optional debug name
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lod_selects_by_nearest_boundary() {
        let lod = LevelOfDetail::new(Vec3::zeros(), vec![1.5]);

        assert_eq!(lod.select(1.0, 2), Some(0));
        assert_eq!(lod.select(2.0, 2), Some(1));
    }

    #[test]
    fn test_lod_boundary_tie_picks_lower_level() {
        let lod = LevelOfDetail::new(Vec3::zeros(), vec![1.5, 3.0]);

        assert_eq!(lod.select(1.5, 3), Some(0));
        assert_eq!(lod.select(3.0, 3), Some(1));
        assert_eq!(lod.select(3.1, 3), Some(2));
    }

    #[test]
    fn test_lod_overlapping_ranges_pick_lower_level() {
        let lod = LevelOfDetail::new(Vec3::zeros(), vec![2.0, 2.0, 5.0]);
        assert_eq!(lod.select(2.0, 4), Some(0));
        assert_eq!(lod.select(4.0, 4), Some(2));
    }

    #[test]
    fn test_lod_clamps_to_available_children() {
        let lod = LevelOfDetail::new(Vec3::zeros(), vec![1.0, 2.0, 3.0]);
        assert_eq!(lod.select(10.0, 2), Some(1));
        assert_eq!(lod.select(10.0, 0), None);
    }

    #[test]
    fn test_grouping_kinds() {
        assert!(NodeKind::Group.is_grouping());
        assert!(NodeKind::Switch { active: None }.is_grouping());
        assert!(!NodeKind::Viewpoint.is_grouping());
        assert!(!NodeKind::Shape(Shape::default()).is_grouping());
        assert!(NodeKind::SharedGroup.is_shared());
    }
}
