//! Arena-backed scene graph
//!
//! Nodes live in a slot map and refer to each other by [`NodeId`]. Plain
//! parent to child links form a tree; a [`NodeKind::SharedGroup`] may be
//! referenced from several parents and keeps one parent entry per reference.
//!
//! Bounds are cached per node and recomputed lazily. Any bounds-affecting
//! change marks the node dirty and walks the dirty flag up through every
//! parent, stopping at the first ancestor that is already dirty.

use slotmap::SlotMap;

use crate::foundation::math::{Mat4, Vec3};
use crate::pipeline::RenderableHandle;
use crate::scene::bounds::Bounds;
use crate::scene::node::{LevelOfDetail, Node, NodeKind, Shape};
use crate::scene::updates::{ChangeClass, NodeChange, PendingAction, SceneUpdate, UpdateFn, UpdateReport};
use crate::scene::{NodeId, SceneError, SceneResult};

/// Result of a write through the scene graph API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Mutation {
    /// The node was changed immediately
    Applied,
    /// The node is live; the change runs at the next update barrier
    Deferred,
}

/// Which writes are currently allowed on live nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateWindow {
    Closed,
    Data,
    Bounds,
}

impl UpdateWindow {
    fn allows(self, class: ChangeClass) -> bool {
        match self {
            Self::Closed => false,
            Self::Data => class == ChangeClass::Data,
            Self::Bounds => true,
        }
    }
}

/// Retained scene graph
#[derive(Debug)]
pub struct SceneGraph {
    nodes: SlotMap<NodeId, Node>,
    live_roots: Vec<NodeId>,
    live_state_stale: bool,
    window: UpdateWindow,
    pending_data: Vec<SceneUpdate>,
    pending_bounds: Vec<SceneUpdate>,
    next_barrier: Vec<SceneUpdate>,
}

impl SceneGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            live_roots: Vec::new(),
            live_state_stale: false,
            window: UpdateWindow::Closed,
            pending_data: Vec::new(),
            pending_bounds: Vec::new(),
            next_barrier: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Insert a detached node
    pub fn create_node(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.insert(Node::new(kind))
    }

    /// Insert a detached, named node
    pub fn create_named(&mut self, name: impl Into<String>, kind: NodeKind) -> NodeId {
        let mut node = Node::new(kind);
        node.name = Some(name.into());
        self.nodes.insert(node)
    }

    /// Insert a plain group
    pub fn create_group(&mut self) -> NodeId {
        self.create_node(NodeKind::Group)
    }

    /// Insert a shared group
    pub fn create_shared_group(&mut self) -> NodeId {
        self.create_node(NodeKind::SharedGroup)
    }

    /// Insert a transform group
    pub fn create_transform_group(&mut self, transform: Mat4) -> NodeId {
        self.create_node(NodeKind::TransformGroup { transform })
    }

    /// Insert a shape
    pub fn create_shape(&mut self, shape: Shape) -> NodeId {
        self.create_node(NodeKind::Shape(shape))
    }

    /// Insert a switch with no active child
    pub fn create_switch(&mut self) -> NodeId {
        self.create_node(NodeKind::Switch { active: None })
    }

    /// Insert a level of detail group
    pub fn create_lod(&mut self, lod: LevelOfDetail) -> NodeId {
        self.create_node(NodeKind::Lod(lod))
    }

    /// Insert a scoped render state group
    pub fn create_effect(&mut self, renderable: RenderableHandle) -> NodeId {
        self.create_node(NodeKind::Effect { renderable })
    }

    /// Insert a viewpoint
    pub fn create_viewpoint(&mut self) -> NodeId {
        self.create_node(NodeKind::Viewpoint)
    }

    /// Insert a background
    pub fn create_background(&mut self, renderable: RenderableHandle) -> NodeId {
        self.create_node(NodeKind::Background { renderable })
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Look up a node
    pub fn node(&self, id: NodeId) -> SceneResult<&Node> {
        self.nodes.get(id).ok_or(SceneError::UnknownNode(id))
    }

    /// Kind of a node
    pub fn kind(&self, id: NodeId) -> SceneResult<&NodeKind> {
        self.node(id).map(Node::kind)
    }

    /// Children of a node in traversal order
    pub fn children(&self, id: NodeId) -> SceneResult<&[NodeId]> {
        self.node(id).map(Node::children)
    }

    /// Whether the id refers to a node in this graph
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Whether a node is reachable from a registered root
    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes.get(id).is_some_and(|node| node.live)
    }

    /// Number of nodes in the arena
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of writes waiting for the next barrier
    pub fn pending_count(&self) -> usize {
        self.pending_data.len() + self.pending_bounds.len() + self.next_barrier.len()
    }

    /// Bounds of a node in its parent's frame
    ///
    /// Dirty bounds are recomputed on demand from the children and cached.
    pub fn bounds(&self, id: NodeId) -> SceneResult<Bounds> {
        self.node(id)?;
        Ok(self.compute_bounds(id))
    }

    /// Recompute dirty bounds below `id` in post-order
    ///
    /// Uses an explicit work stack so graph depth is bounded by memory, not
    /// by the thread's stack.
    fn compute_bounds(&self, id: NodeId) -> Bounds {
        let mut stack = vec![(id, false)];
        while let Some((current, children_done)) = stack.pop() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            if !node.bounds_dirty.get() {
                continue;
            }
            if !children_done {
                stack.push((current, true));
                stack.extend(Self::bounds_sources(node).iter().map(|&child| (child, false)));
                continue;
            }

            let union_of = |ids: &[NodeId]| ids.iter().map(|&child| self.cached_bounds(child)).collect::<Bounds>();
            let bounds = match &node.kind {
                NodeKind::TransformGroup { transform } => union_of(&node.children).transformed(transform),
                NodeKind::Shape(shape) => shape.geometry_bounds,
                _ => union_of(Self::bounds_sources(node)),
            };
            node.bounds.set(bounds);
            node.bounds_dirty.set(false);
        }
        self.cached_bounds(id)
    }

    /// Children whose bounds contribute to a node's bounds
    fn bounds_sources(node: &Node) -> &[NodeId] {
        match &node.kind {
            NodeKind::Group
            | NodeKind::SharedGroup
            | NodeKind::Lod(_)
            | NodeKind::Effect { .. }
            | NodeKind::TransformGroup { .. } => &node.children,
            NodeKind::Switch { active } => match active {
                Some(index) if *index < node.children.len() => &node.children[*index..=*index],
                _ => &[],
            },
            NodeKind::Shape(_) | NodeKind::Viewpoint | NodeKind::Background { .. } => &[],
        }
    }

    fn cached_bounds(&self, id: NodeId) -> Bounds {
        self.nodes.get(id).map_or(Bounds::Null, |node| node.bounds.get())
    }

    /// World transform of a node along its first-parent chain
    ///
    /// Shared groups have no single world transform; the first parent is
    /// used, so viewpoints should not be placed below shared groups.
    pub fn world_transform(&self, id: NodeId) -> SceneResult<Mat4> {
        let mut current = self.node(id)?;
        let mut transform = current.kind.local_transform();
        let mut hops = 0usize;
        while let Some(&parent) = current.parents.first() {
            current = self.node(parent)?;
            transform = current.kind.local_transform() * transform;
            hops += 1;
            if hops > self.nodes.len() {
                break;
            }
        }
        Ok(transform)
    }

    /// World position of a node's origin
    pub fn world_position(&self, id: NodeId) -> SceneResult<Vec3> {
        let world = self.world_transform(id)?;
        Ok(Vec3::new(world.m14, world.m24, world.m34))
    }

    // ------------------------------------------------------------------
    // Live state
    // ------------------------------------------------------------------

    /// Register the roots currently attached to the pipeline
    ///
    /// Everything reachable from them becomes live immediately.
    pub fn set_live_roots(&mut self, roots: Vec<NodeId>) {
        self.live_roots = roots;
        self.refresh_live_state();
    }

    /// Roots registered with [`Self::set_live_roots`]
    pub fn live_roots(&self) -> &[NodeId] {
        &self.live_roots
    }

    fn refresh_live_state(&mut self) {
        for node in self.nodes.values_mut() {
            node.live = false;
        }

        let mut stack: Vec<NodeId> = self.live_roots.clone();
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(id) {
                if node.live {
                    continue;
                }
                node.live = true;
                stack.extend(node.children.iter().copied());
            }
        }
        self.live_state_stale = false;
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Append a child
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> SceneResult<Mutation> {
        self.write(parent, NodeChange::AddChild(child))
    }

    /// Detach a child
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> SceneResult<Mutation> {
        self.write(parent, NodeChange::RemoveChild(child))
    }

    /// Replace a transform group's matrix
    pub fn set_transform(&mut self, id: NodeId, transform: Mat4) -> SceneResult<Mutation> {
        self.write(id, NodeChange::SetTransform(transform))
    }

    /// Replace a shape's geometry bounds
    pub fn set_geometry_bounds(&mut self, id: NodeId, bounds: Bounds) -> SceneResult<Mutation> {
        self.write(id, NodeChange::SetGeometryBounds(bounds))
    }

    /// Select a switch child, or none
    pub fn set_active_child(&mut self, id: NodeId, active: Option<usize>) -> SceneResult<Mutation> {
        self.write(id, NodeChange::SetActiveChild(active))
    }

    /// Replace a shape's renderable
    pub fn set_renderable(&mut self, id: NodeId, renderable: Option<RenderableHandle>) -> SceneResult<Mutation> {
        self.write(id, NodeChange::SetRenderable(renderable))
    }

    /// Change a shape's transparency
    pub fn set_transparent(&mut self, id: NodeId, transparent: bool) -> SceneResult<Mutation> {
        self.write(id, NodeChange::SetTransparent(transparent))
    }

    /// Change a shape's state grouping key
    pub fn set_state_key(&mut self, id: NodeId, state_key: u64) -> SceneResult<Mutation> {
        self.write(id, NodeChange::SetStateKey(state_key))
    }

    /// Replace a LOD group's range boundaries
    pub fn set_lod_ranges(&mut self, id: NodeId, ranges: Vec<f32>) -> SceneResult<Mutation> {
        self.write(id, NodeChange::SetLodRanges(ranges))
    }

    /// Remove a node that no parent references any more
    ///
    /// Its children are detached, not removed.
    pub fn remove_node(&mut self, id: NodeId) -> SceneResult<Mutation> {
        self.write(id, NodeChange::RemoveNode)
    }

    /// Apply a recorded mutation, deferring it if the node is live
    pub fn write(&mut self, id: NodeId, change: NodeChange) -> SceneResult<Mutation> {
        let node = self.node(id)?;
        Self::check_kind(id, &node.kind, &change)?;

        let class = change.class();
        if node.live && !self.window.allows(class) {
            log::trace!("Deferring {:?} on live node {:?}", change, id);
            self.enqueue(SceneUpdate::change(id, change));
            return Ok(Mutation::Deferred);
        }

        self.apply_change(id, change)?;
        Ok(Mutation::Applied)
    }

    /// Register a bounds-affecting listener for the next update barrier
    pub fn bounds_changed<F>(&mut self, id: NodeId, listener: F) -> SceneResult<()>
    where
        F: FnOnce(&mut Self, NodeId) -> SceneResult<()> + Send + 'static,
    {
        self.register(id, ChangeClass::Bounds, Box::new(listener))
    }

    /// Register a property-only listener for the next update barrier
    pub fn data_changed<F>(&mut self, id: NodeId, listener: F) -> SceneResult<()>
    where
        F: FnOnce(&mut Self, NodeId) -> SceneResult<()> + Send + 'static,
    {
        self.register(id, ChangeClass::Data, Box::new(listener))
    }

    fn register(&mut self, id: NodeId, class: ChangeClass, listener: UpdateFn) -> SceneResult<()> {
        self.node(id)?;
        let update = SceneUpdate::listener(id, class, listener);
        if self.window == UpdateWindow::Closed {
            self.enqueue(update);
        } else {
            self.next_barrier.push(update);
        }
        Ok(())
    }

    /// Queue an update for the next barrier
    pub fn enqueue(&mut self, update: SceneUpdate) {
        match update.class {
            ChangeClass::Data => self.pending_data.push(update),
            ChangeClass::Bounds => self.pending_bounds.push(update),
        }
    }

    fn check_kind(id: NodeId, kind: &NodeKind, change: &NodeChange) -> SceneResult<()> {
        let accepted = match change {
            NodeChange::AddChild(_) | NodeChange::RemoveChild(_) => kind.is_grouping(),
            NodeChange::SetTransform(_) => matches!(kind, NodeKind::TransformGroup { .. }),
            NodeChange::SetActiveChild(_) => matches!(kind, NodeKind::Switch { .. }),
            NodeChange::SetLodRanges(_) => matches!(kind, NodeKind::Lod(_)),
            NodeChange::SetGeometryBounds(_)
            | NodeChange::SetRenderable(_)
            | NodeChange::SetTransparent(_)
            | NodeChange::SetStateKey(_) => matches!(kind, NodeKind::Shape(_)),
            NodeChange::RemoveNode => true,
        };
        if accepted {
            Ok(())
        } else {
            Err(SceneError::WrongKind { node: id, kind: kind.name(), operation: change_name(change) })
        }
    }

    fn apply_change(&mut self, id: NodeId, change: NodeChange) -> SceneResult<()> {
        match change {
            NodeChange::AddChild(child) => self.attach(id, child),
            NodeChange::RemoveChild(child) => self.detach(id, child),
            NodeChange::RemoveNode => self.remove_detached(id),
            change => {
                let class = change.class();
                let node = self.nodes.get_mut(id).ok_or(SceneError::UnknownNode(id))?;
                Self::check_kind(id, &node.kind, &change)?;
                match (&mut node.kind, change) {
                    (NodeKind::TransformGroup { transform }, NodeChange::SetTransform(matrix)) => *transform = matrix,
                    (NodeKind::Shape(shape), NodeChange::SetGeometryBounds(bounds)) => shape.geometry_bounds = bounds,
                    (NodeKind::Shape(shape), NodeChange::SetRenderable(renderable)) => shape.renderable = renderable,
                    (NodeKind::Shape(shape), NodeChange::SetTransparent(transparent)) => shape.transparent = transparent,
                    (NodeKind::Shape(shape), NodeChange::SetStateKey(key)) => shape.state_key = key,
                    (NodeKind::Lod(lod), NodeChange::SetLodRanges(ranges)) => lod.ranges = ranges,
                    (NodeKind::Switch { active }, NodeChange::SetActiveChild(index)) => {
                        if let Some(index) = index {
                            if index >= node.children.len() {
                                return Err(SceneError::ChildIndexOutOfRange { node: id, index, count: node.children.len() });
                            }
                        }
                        *active = index;
                    }
                    _ => {}
                }
                if class == ChangeClass::Bounds {
                    self.mark_bounds_dirty(id);
                }
                Ok(())
            }
        }
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) -> SceneResult<()> {
        let child_node = self.node(child)?;
        if parent == child || self.is_ancestor(child, parent) {
            return Err(SceneError::Cycle { parent, child });
        }
        if !child_node.kind.is_shared() && !child_node.parents.is_empty() {
            return Err(SceneError::AlreadyParented(child));
        }

        self.nodes[parent].children.push(child);
        self.nodes[child].parents.push(parent);
        self.live_state_stale = true;
        self.mark_bounds_dirty(parent);
        Ok(())
    }

    fn detach(&mut self, parent: NodeId, child: NodeId) -> SceneResult<()> {
        let parent_node = self.nodes.get_mut(parent).ok_or(SceneError::UnknownNode(parent))?;
        let position = parent_node
            .children
            .iter()
            .position(|&c| c == child)
            .ok_or(SceneError::NotAChild { parent, child })?;
        parent_node.children.remove(position);

        // Keep the switch pointing at the same child, or at nothing
        if let NodeKind::Switch { active } = &mut parent_node.kind {
            *active = match *active {
                Some(index) if index == position => None,
                Some(index) if index > position => Some(index - 1),
                other => other,
            };
        }

        if let Some(child_node) = self.nodes.get_mut(child) {
            if let Some(slot) = child_node.parents.iter().position(|&p| p == parent) {
                child_node.parents.remove(slot);
            }
        }
        self.live_state_stale = true;
        self.mark_bounds_dirty(parent);
        Ok(())
    }

    fn remove_detached(&mut self, id: NodeId) -> SceneResult<()> {
        let node = self.node(id)?;
        if !node.parents.is_empty() {
            return Err(SceneError::StillAttached { node: id, parents: node.parents.len() });
        }

        if let Some(node) = self.nodes.remove(id) {
            for child in node.children {
                if let Some(child_node) = self.nodes.get_mut(child) {
                    if let Some(slot) = child_node.parents.iter().position(|&p| p == id) {
                        child_node.parents.remove(slot);
                    }
                }
            }
        }
        self.live_roots.retain(|&root| root != id);
        self.live_state_stale = true;
        Ok(())
    }

    /// Whether `ancestor` is reachable by walking up from `node`
    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut stack = vec![node];
        let mut visited = 0usize;
        while let Some(current) = stack.pop() {
            if current == ancestor {
                return true;
            }
            visited += 1;
            if visited > self.nodes.len() * 2 {
                break;
            }
            if let Some(n) = self.nodes.get(current) {
                stack.extend(n.parents.iter().copied());
            }
        }
        false
    }

    /// Mark a node's bounds dirty and propagate to its ancestors
    pub fn mark_bounds_dirty(&mut self, id: NodeId) {
        let mut stack = vec![id];
        let mut first = true;
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            // The changed node itself is always re-dirtied; ancestors that
            // are already dirty have dirty ancestors too
            if node.bounds_dirty.get() && !first {
                continue;
            }
            first = false;
            node.bounds_dirty.set(true);
            stack.extend(node.parents.iter().copied());
        }
    }

    // ------------------------------------------------------------------
    // Update barrier
    // ------------------------------------------------------------------

    /// Run the once-per-frame update window
    ///
    /// Externally queued updates join the pending lists, then data-class
    /// updates run, then bounds-class updates. Bounds-affecting writes made
    /// from a data callback are deferred into the bounds pass of the same
    /// barrier. Listeners registered while the window is open run at the
    /// next barrier. The bounds pass only runs if a bounds-class update was
    /// processed.
    pub fn process_updates(&mut self, external: impl IntoIterator<Item = SceneUpdate>) -> UpdateReport {
        for update in external {
            self.enqueue(update);
        }

        let mut report = UpdateReport::default();

        let data = std::mem::take(&mut self.pending_data);
        self.window = UpdateWindow::Data;
        for update in data {
            report.data_updates += 1;
            if let Err(e) = self.run_update(update) {
                report.errors.push(e);
            }
        }

        // Bounds writes deferred from the data pass run in this barrier too
        let bounds = std::mem::take(&mut self.pending_bounds);
        self.window = UpdateWindow::Bounds;
        for update in bounds {
            report.bounds_updates += 1;
            if let Err(e) = self.run_update(update) {
                report.errors.push(e);
            }
        }
        self.window = UpdateWindow::Closed;
        for update in std::mem::take(&mut self.next_barrier) {
            self.enqueue(update);
        }

        if report.bounds_updates > 0 {
            for root in self.live_roots.clone() {
                self.compute_bounds(root);
            }
            report.bounds_revalidated = true;
        }
        if self.live_state_stale {
            self.refresh_live_state();
        }

        log::trace!(
            "Update barrier: {} data, {} bounds, {} errors",
            report.data_updates,
            report.bounds_updates,
            report.errors.len()
        );
        report
    }

    fn run_update(&mut self, update: SceneUpdate) -> SceneResult<()> {
        let SceneUpdate { node, action, .. } = update;
        self.node(node)?;
        match action {
            PendingAction::Change(change) => self.write(node, change).map(|_| ()),
            PendingAction::Listener(listener) => listener(self, node),
        }
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn change_name(change: &NodeChange) -> &'static str {
    match change {
        NodeChange::AddChild(_) => "add_child",
        NodeChange::RemoveChild(_) => "remove_child",
        NodeChange::SetTransform(_) => "set_transform",
        NodeChange::SetGeometryBounds(_) => "set_geometry_bounds",
        NodeChange::SetActiveChild(_) => "set_active_child",
        NodeChange::RemoveNode => "remove_node",
        NodeChange::SetRenderable(_) => "set_renderable",
        NodeChange::SetTransparent(_) => "set_transparent",
        NodeChange::SetStateKey(_) => "set_state_key",
        NodeChange::SetLodRanges(_) => "set_lod_ranges",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4Ext;
    use crate::pipeline::NullRenderable;
    use std::sync::Arc;

    fn shape_with(graph: &mut SceneGraph, min: Vec3, max: Vec3) -> NodeId {
        graph.create_shape(Shape::new(Arc::new(NullRenderable), Bounds::from_corners(min, max)))
    }

    #[test]
    fn test_group_bounds_union_and_shrink() {
        let mut graph = SceneGraph::new();
        let group = graph.create_group();
        let first = shape_with(&mut graph, Vec3::new(-2.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 1.0));
        let second = shape_with(&mut graph, Vec3::new(0.0, 0.0, 1.0), Vec3::new(2.0, 2.0, 1.0));

        assert_eq!(graph.add_child(group, first).unwrap(), Mutation::Applied);
        assert_eq!(graph.add_child(group, second).unwrap(), Mutation::Applied);
        assert_eq!(
            graph.bounds(group).unwrap(),
            Bounds::from_corners(Vec3::new(-2.0, 0.0, 0.0), Vec3::new(2.0, 2.0, 1.0))
        );

        assert_eq!(graph.remove_child(group, first).unwrap(), Mutation::Applied);
        assert_eq!(
            graph.bounds(group).unwrap(),
            Bounds::from_corners(Vec3::new(0.0, 0.0, 1.0), Vec3::new(2.0, 2.0, 1.0))
        );
    }

    #[test]
    fn test_empty_group_has_null_bounds() {
        let mut graph = SceneGraph::new();
        let group = graph.create_group();
        let empty_child = graph.create_group();
        graph.add_child(group, empty_child).unwrap();

        assert!(graph.bounds(group).unwrap().is_null());
    }

    #[test]
    fn test_transform_group_bounds_include_local_transform() {
        let mut graph = SceneGraph::new();
        let tg = graph.create_transform_group(Mat4::translation(10.0, 0.0, 0.0));
        let shape = shape_with(&mut graph, Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        graph.add_child(tg, shape).unwrap();

        assert_eq!(
            graph.bounds(tg).unwrap(),
            Bounds::from_corners(Vec3::new(9.0, -1.0, -1.0), Vec3::new(11.0, 1.0, 1.0))
        );
    }

    #[test]
    fn test_dirty_flag_propagates_to_every_ancestor() {
        let mut graph = SceneGraph::new();
        let root = graph.create_group();
        let middle = graph.create_transform_group(Mat4::identity());
        let shape = shape_with(&mut graph, Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        graph.add_child(root, middle).unwrap();
        graph.add_child(middle, shape).unwrap();
        graph.bounds(root).unwrap();
        assert!(!graph.node(root).unwrap().is_bounds_dirty());

        graph.set_geometry_bounds(shape, Bounds::from_corners(Vec3::zeros(), Vec3::new(3.0, 3.0, 3.0))).unwrap();
        assert!(graph.node(shape).unwrap().is_bounds_dirty());
        assert!(graph.node(middle).unwrap().is_bounds_dirty());
        assert!(graph.node(root).unwrap().is_bounds_dirty());
        assert_eq!(
            graph.bounds(root).unwrap(),
            Bounds::from_corners(Vec3::zeros(), Vec3::new(3.0, 3.0, 3.0))
        );
    }

    #[test]
    fn test_shared_group_dirties_all_parents() {
        let mut graph = SceneGraph::new();
        let left = graph.create_transform_group(Mat4::translation(-5.0, 0.0, 0.0));
        let right = graph.create_transform_group(Mat4::translation(5.0, 0.0, 0.0));
        let shared = graph.create_shared_group();
        let shape = shape_with(&mut graph, Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        graph.add_child(shared, shape).unwrap();
        graph.add_child(left, shared).unwrap();
        graph.add_child(right, shared).unwrap();
        graph.bounds(left).unwrap();
        graph.bounds(right).unwrap();

        graph.set_geometry_bounds(shape, Bounds::from_corners(Vec3::zeros(), Vec3::new(2.0, 1.0, 1.0))).unwrap();
        assert!(graph.node(left).unwrap().is_bounds_dirty());
        assert!(graph.node(right).unwrap().is_bounds_dirty());
        assert_eq!(graph.node(shared).unwrap().parents().len(), 2);
    }

    #[test]
    fn test_second_parent_rejected_for_plain_nodes() {
        let mut graph = SceneGraph::new();
        let a = graph.create_group();
        let b = graph.create_group();
        let child = graph.create_group();
        graph.add_child(a, child).unwrap();

        assert!(matches!(graph.add_child(b, child), Err(SceneError::AlreadyParented(_))));
    }

    #[test]
    fn test_cycles_rejected() {
        let mut graph = SceneGraph::new();
        let a = graph.create_group();
        let b = graph.create_group();
        graph.add_child(a, b).unwrap();

        assert!(matches!(graph.add_child(b, a), Err(SceneError::Cycle { .. })));
        assert!(matches!(graph.add_child(a, a), Err(SceneError::Cycle { .. })));
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let mut graph = SceneGraph::new();
        let group = graph.create_group();
        let viewpoint = graph.create_viewpoint();

        assert!(matches!(graph.set_transform(group, Mat4::identity()), Err(SceneError::WrongKind { .. })));
        assert!(matches!(graph.add_child(viewpoint, group), Err(SceneError::WrongKind { .. })));
    }

    #[test]
    fn test_switch_bounds_follow_active_child() {
        let mut graph = SceneGraph::new();
        let switch = graph.create_switch();
        let a = shape_with(&mut graph, Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        let b = shape_with(&mut graph, Vec3::new(5.0, 5.0, 5.0), Vec3::new(6.0, 6.0, 6.0));
        graph.add_child(switch, a).unwrap();
        graph.add_child(switch, b).unwrap();
        assert!(graph.bounds(switch).unwrap().is_null());

        graph.set_active_child(switch, Some(1)).unwrap();
        assert_eq!(graph.bounds(switch).unwrap(), graph.bounds(b).unwrap());

        assert!(matches!(
            graph.set_active_child(switch, Some(2)),
            Err(SceneError::ChildIndexOutOfRange { .. })
        ));

        graph.remove_child(switch, a).unwrap();
        assert_eq!(graph.kind(switch).unwrap().active_child(), Some(Some(0)));
    }

    #[test]
    fn test_live_write_is_deferred_until_barrier() {
        let mut graph = SceneGraph::new();
        let root = graph.create_group();
        let tg = graph.create_transform_group(Mat4::identity());
        let shape = shape_with(&mut graph, Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        graph.add_child(root, tg).unwrap();
        graph.add_child(tg, shape).unwrap();
        graph.set_live_roots(vec![root]);
        let before = graph.bounds(root).unwrap();

        let outcome = graph.set_transform(tg, Mat4::translation(4.0, 0.0, 0.0)).unwrap();
        assert_eq!(outcome, Mutation::Deferred);
        assert_eq!(graph.bounds(root).unwrap(), before);
        assert_eq!(graph.pending_count(), 1);

        let report = graph.process_updates(Vec::new());
        assert_eq!(report.bounds_updates, 1);
        assert!(report.bounds_revalidated);
        assert_eq!(
            graph.bounds(root).unwrap(),
            Bounds::from_corners(Vec3::new(4.0, 0.0, 0.0), Vec3::new(5.0, 1.0, 1.0))
        );
    }

    #[test]
    fn test_data_only_barrier_skips_bounds_pass() {
        let mut graph = SceneGraph::new();
        let root = graph.create_group();
        let shape = shape_with(&mut graph, Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        graph.add_child(root, shape).unwrap();
        graph.set_live_roots(vec![root]);

        assert_eq!(graph.set_transparent(shape, true).unwrap(), Mutation::Deferred);
        let report = graph.process_updates(Vec::new());

        assert_eq!(report.data_updates, 1);
        assert!(!report.bounds_revalidated);
        assert!(graph.kind(shape).unwrap().as_shape().unwrap().transparent);
    }

    #[test]
    fn test_bounds_write_from_data_listener_runs_in_same_barrier() {
        let mut graph = SceneGraph::new();
        let root = graph.create_transform_group(Mat4::identity());
        let shape = shape_with(&mut graph, Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        graph.add_child(root, shape).unwrap();
        graph.set_live_roots(vec![root]);

        graph
            .data_changed(root, |graph, node| {
                let outcome = graph.set_transform(node, Mat4::translation(0.0, 2.0, 0.0))?;
                assert_eq!(outcome, Mutation::Deferred);
                Ok(())
            })
            .unwrap();

        let report = graph.process_updates(Vec::new());
        assert!(report.errors.is_empty());
        assert_eq!(
            graph.bounds(root).unwrap(),
            Bounds::from_corners(Vec3::new(0.0, 2.0, 0.0), Vec3::new(1.0, 3.0, 1.0))
        );
    }

    #[test]
    fn test_listener_registered_inside_barrier_waits_for_next() {
        let mut graph = SceneGraph::new();
        let root = graph.create_group();
        let shape = shape_with(&mut graph, Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        graph.add_child(root, shape).unwrap();
        graph.set_live_roots(vec![root]);

        graph
            .data_changed(shape, |graph, node| {
                graph.bounds_changed(node, |graph, node| {
                    graph.set_geometry_bounds(node, Bounds::from_corners(Vec3::zeros(), Vec3::new(4.0, 4.0, 4.0)))?;
                    Ok(())
                })
            })
            .unwrap();

        let report = graph.process_updates(Vec::new());
        assert_eq!(report.data_updates, 1);
        assert_eq!(report.bounds_updates, 0);
        assert_eq!(graph.pending_count(), 1);
        assert_eq!(graph.bounds(root).unwrap(), Bounds::from_corners(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0)));

        let report = graph.process_updates(Vec::new());
        assert_eq!(report.bounds_updates, 1);
        assert_eq!(graph.pending_count(), 0);
        assert_eq!(graph.bounds(root).unwrap(), Bounds::from_corners(Vec3::zeros(), Vec3::new(4.0, 4.0, 4.0)));
    }

    #[test]
    fn test_deep_chain_bounds_do_not_overflow_stack() {
        let mut graph = SceneGraph::new();
        let mut top = shape_with(&mut graph, Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        for _ in 0..100_000 {
            let group = graph.create_group();
            graph.add_child(group, top).unwrap();
            top = group;
        }

        assert_eq!(graph.bounds(top).unwrap(), Bounds::from_corners(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0)));
    }

    #[test]
    fn test_bounds_listener_writes_immediately() {
        let mut graph = SceneGraph::new();
        let root = graph.create_group();
        let shape = shape_with(&mut graph, Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        graph.add_child(root, shape).unwrap();
        graph.set_live_roots(vec![root]);

        graph
            .bounds_changed(shape, |graph, node| {
                let outcome = graph.set_geometry_bounds(node, Bounds::from_corners(Vec3::zeros(), Vec3::new(2.0, 2.0, 2.0)))?;
                assert_eq!(outcome, Mutation::Applied);
                Ok(())
            })
            .unwrap();
        assert_eq!(graph.bounds(root).unwrap(), Bounds::from_corners(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0)));

        graph.process_updates(Vec::new());
        assert_eq!(graph.bounds(root).unwrap(), Bounds::from_corners(Vec3::zeros(), Vec3::new(2.0, 2.0, 2.0)));
    }

    #[test]
    fn test_attached_subtree_becomes_live_after_barrier() {
        let mut graph = SceneGraph::new();
        let root = graph.create_group();
        graph.set_live_roots(vec![root]);
        let subtree = graph.create_group();

        assert_eq!(graph.add_child(root, subtree).unwrap(), Mutation::Deferred);
        assert!(!graph.is_live(subtree));

        graph.process_updates(Vec::new());
        assert!(graph.is_live(subtree));
        assert_eq!(graph.children(root).unwrap(), &[subtree]);
    }

    #[test]
    fn test_remove_node_requires_detached() {
        let mut graph = SceneGraph::new();
        let root = graph.create_group();
        let child = graph.create_group();
        graph.add_child(root, child).unwrap();

        assert!(matches!(graph.remove_node(child), Err(SceneError::StillAttached { .. })));
        graph.remove_child(root, child).unwrap();
        assert_eq!(graph.remove_node(child).unwrap(), Mutation::Applied);
        assert!(!graph.contains(child));
    }

    #[test]
    fn test_world_transform_composes_first_parent_chain() {
        let mut graph = SceneGraph::new();
        let outer = graph.create_transform_group(Mat4::translation(1.0, 0.0, 0.0));
        let inner = graph.create_transform_group(Mat4::translation(0.0, 2.0, 0.0));
        let viewpoint = graph.create_viewpoint();
        graph.add_child(outer, inner).unwrap();
        graph.add_child(inner, viewpoint).unwrap();

        assert_eq!(graph.world_position(viewpoint).unwrap(), Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn test_failed_deferred_change_is_reported() {
        let mut graph = SceneGraph::new();
        let root = graph.create_group();
        let a = graph.create_group();
        let b = graph.create_group();
        graph.add_child(a, b).unwrap();
        graph.set_live_roots(vec![root]);

        // b already has a parent; the failure surfaces at the barrier
        assert_eq!(graph.add_child(root, b).unwrap(), Mutation::Deferred);
        let report = graph.process_updates(Vec::new());
        assert_eq!(report.errors.len(), 1);
    }
}
