//! Update barrier plumbing
//!
//! Scene graph writes that touch live nodes are never applied while a frame
//! is in flight. They are queued here and applied by the render thread in
//! the single update window that opens before each cull. Application
//! threads reach the render thread through [`UpdateHandle`], which sends
//! [`SceneUpdate`] messages down a channel drained at the barrier.

use crate::foundation::math::Mat4;
use crate::pipeline::RenderableHandle;
use crate::scene::bounds::Bounds;
use crate::scene::{NodeId, SceneError, SceneGraph};

/// Deferred node callback, run inside the update window
pub type UpdateFn = Box<dyn FnOnce(&mut SceneGraph, NodeId) -> Result<(), SceneError> + Send>;

/// Which barrier pass a change belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeClass {
    /// Can change the extent of the node and therefore its ancestors
    Bounds,
    /// Property-only change; the bounds pass is skipped for it
    Data,
}

/// A single node mutation
#[derive(Debug, Clone)]
pub enum NodeChange {
    /// Append a child
    AddChild(NodeId),
    /// Detach a child
    RemoveChild(NodeId),
    /// Replace a transform group's matrix
    SetTransform(Mat4),
    /// Replace a shape's geometry bounds
    SetGeometryBounds(Bounds),
    /// Select a switch child
    SetActiveChild(Option<usize>),
    /// Remove a detached node from the arena
    RemoveNode,
    /// Replace a shape's renderable
    SetRenderable(Option<RenderableHandle>),
    /// Change a shape's transparency
    SetTransparent(bool),
    /// Change a shape's state grouping key
    SetStateKey(u64),
    /// Replace a LOD group's range boundaries
    SetLodRanges(Vec<f32>),
}

impl NodeChange {
    /// Barrier pass the change runs in
    pub fn class(&self) -> ChangeClass {
        match self {
            Self::AddChild(_)
            | Self::RemoveChild(_)
            | Self::SetTransform(_)
            | Self::SetGeometryBounds(_)
            | Self::SetActiveChild(_)
            | Self::RemoveNode => ChangeClass::Bounds,
            Self::SetRenderable(_)
            | Self::SetTransparent(_)
            | Self::SetStateKey(_)
            | Self::SetLodRanges(_) => ChangeClass::Data,
        }
    }
}

/// What to do with a node at the barrier
pub enum PendingAction {
    /// Apply a recorded mutation
    Change(NodeChange),
    /// Invoke a registered listener
    Listener(UpdateFn),
}

impl std::fmt::Debug for PendingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Change(change) => f.debug_tuple("Change").field(change).finish(),
            Self::Listener(_) => f.write_str("Listener(..)"),
        }
    }
}

/// Queued node update
#[derive(Debug)]
pub struct SceneUpdate {
    /// Target node
    pub node: NodeId,
    /// Barrier pass
    pub class: ChangeClass,
    /// Work to perform
    pub action: PendingAction,
}

impl SceneUpdate {
    /// Wrap a recorded mutation
    pub fn change(node: NodeId, change: NodeChange) -> Self {
        Self {
            node,
            class: change.class(),
            action: PendingAction::Change(change),
        }
    }

    /// Wrap a listener
    pub fn listener(node: NodeId, class: ChangeClass, listener: UpdateFn) -> Self {
        Self {
            node,
            class,
            action: PendingAction::Listener(listener),
        }
    }
}

/// Outcome of one barrier
#[derive(Debug, Default)]
pub struct UpdateReport {
    /// Data-class updates processed
    pub data_updates: usize,
    /// Bounds-class updates processed
    pub bounds_updates: usize,
    /// Whether the bounds pass ran
    pub bounds_revalidated: bool,
    /// Updates that failed to apply
    pub errors: Vec<SceneError>,
}

/// Cloneable sender used by application threads
#[derive(Debug, Clone)]
pub struct UpdateHandle {
    sender: flume::Sender<SceneUpdate>,
}

impl UpdateHandle {
    /// Request a bounds-affecting update; the listener runs at the next barrier
    pub fn bounds_changed<F>(&self, node: NodeId, listener: F) -> bool
    where
        F: FnOnce(&mut SceneGraph, NodeId) -> Result<(), SceneError> + Send + 'static,
    {
        self.send(SceneUpdate::listener(node, ChangeClass::Bounds, Box::new(listener)))
    }

    /// Request a property-only update; the listener runs at the next barrier
    pub fn data_changed<F>(&self, node: NodeId, listener: F) -> bool
    where
        F: FnOnce(&mut SceneGraph, NodeId) -> Result<(), SceneError> + Send + 'static,
    {
        self.send(SceneUpdate::listener(node, ChangeClass::Data, Box::new(listener)))
    }

    /// Queue a recorded mutation
    pub fn submit(&self, node: NodeId, change: NodeChange) -> bool {
        self.send(SceneUpdate::change(node, change))
    }

    /// Returns false once the render side has gone away
    fn send(&self, update: SceneUpdate) -> bool {
        if let Err(e) = self.sender.send(update) {
            log::debug!("Dropping scene update for {:?}: render side disconnected", e.into_inner().node);
            return false;
        }
        true
    }
}

/// Receiving end owned by the render thread
#[derive(Debug)]
pub struct UpdateQueue {
    sender: flume::Sender<SceneUpdate>,
    receiver: flume::Receiver<SceneUpdate>,
}

impl UpdateQueue {
    /// Create an unbounded queue
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self { sender, receiver }
    }

    /// New sender for an application thread
    pub fn handle(&self) -> UpdateHandle {
        UpdateHandle { sender: self.sender.clone() }
    }

    /// Take everything queued so far without blocking
    pub fn drain(&self) -> Vec<SceneUpdate> {
        self.receiver.try_iter().collect()
    }

    /// Number of queued updates
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for UpdateQueue {
    fn default() -> Self {
        Self::new()
    }
}
