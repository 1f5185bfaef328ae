//! Retained scene graph
//!
//! Owns the nodes the render pipeline traverses each frame.
//!
//! ## Architecture
//!
//! ```text
//! Application thread(s)
//!      ↓  UpdateHandle (channel)
//! Update barrier (once per frame)
//!      ↓
//! SceneGraph (arena, lazy bounds, live flags)
//!      ↓
//! Cull stage
//! ```
//!
//! The graph:
//! - Stores nodes in a slot map and hands out [`NodeId`] handles
//! - Caches bounds per node and recomputes dirty ones on read
//! - Defers writes to live nodes until the next update barrier

mod bounds;
mod frustum;
mod graph;
mod layer;
mod node;
mod updates;

pub use bounds::{Bounds, AABB};
pub use frustum::{Frustum, Plane};
pub use graph::{Mutation, SceneGraph};
pub use layer::{Fog, Layer, ProjectionType, Scene, ViewEnvironment, Viewport};
pub(crate) use layer::collect_roots;
pub use node::{LevelOfDetail, Node, NodeKind, Shape};
pub use updates::{ChangeClass, NodeChange, PendingAction, SceneUpdate, UpdateFn, UpdateHandle, UpdateQueue, UpdateReport};

slotmap::new_key_type! {
    /// Handle to a node in a [`SceneGraph`]
    pub struct NodeId;
}

/// Scene graph errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// The id does not refer to a node in this graph
    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),

    /// The operation does not apply to this node kind
    #[error("{operation} is not supported by {kind} node {node:?}")]
    WrongKind {
        /// Target node
        node: NodeId,
        /// Kind of the target node
        kind: &'static str,
        /// Rejected operation
        operation: &'static str,
    },

    /// Attaching the child would make it its own ancestor
    #[error("Attaching {child:?} below {parent:?} would create a cycle")]
    Cycle {
        /// Intended parent
        parent: NodeId,
        /// Intended child
        child: NodeId,
    },

    /// Only shared groups may have more than one parent
    #[error("Node {0:?} already has a parent")]
    AlreadyParented(NodeId),

    /// The node is not a child of the given parent
    #[error("Node {child:?} is not a child of {parent:?}")]
    NotAChild {
        /// Parent searched
        parent: NodeId,
        /// Missing child
        child: NodeId,
    },

    /// The node is still referenced and cannot be removed
    #[error("Node {node:?} is still referenced by {parents} parent(s)")]
    StillAttached {
        /// Node to remove
        node: NodeId,
        /// Remaining parent references
        parents: usize,
    },

    /// Switch index past the last child
    #[error("Child index {index} out of range for node {node:?} with {count} children")]
    ChildIndexOutOfRange {
        /// Target node
        node: NodeId,
        /// Requested index
        index: usize,
        /// Number of children
        count: usize,
    },
}

/// Result type for scene graph operations
pub type SceneResult<T> = Result<T, SceneError>;
