//! Sort stages
//!
//! Sorting never adds or drops ops. A START..STOP block (a shape, or an
//! effect with its subtree) moves as a unit among the siblings of its
//! enclosing scope, and each scope is sorted recursively, so pairing and
//! scoped transforms stay valid. All sorts are stable.

use std::cmp::Ordering;

use crate::pipeline::control::HaltFlag;
use crate::pipeline::render_op::{CulledFrame, GraphicsDetails, RenderOp};

/// Reorders the cull output
pub trait SortStage: Send {
    /// Reorder every pass of the frame
    fn sort(&mut self, frame: CulledFrame) -> CulledFrame;

    /// Share the pipeline's cancellation flag
    fn bind_halt_flag(&mut self, flag: HaltFlag);

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Keeps cull order
#[derive(Debug, Default)]
pub struct NullSortStage;

impl NullSortStage {
    /// Create the stage
    pub fn new() -> Self {
        Self
    }
}

impl SortStage for NullSortStage {
    fn sort(&mut self, frame: CulledFrame) -> CulledFrame {
        frame
    }

    fn bind_halt_flag(&mut self, _flag: HaltFlag) {}

    fn name(&self) -> &'static str {
        "NullSortStage"
    }
}

/// Opaque front to back, then transparent back to front
#[derive(Debug, Default)]
pub struct DepthSortStage {
    halt: HaltFlag,
}

impl DepthSortStage {
    /// Create the stage
    pub fn new() -> Self {
        Self::default()
    }
}

impl SortStage for DepthSortStage {
    fn sort(&mut self, frame: CulledFrame) -> CulledFrame {
        sort_frame(frame, &self.halt, compare_depth)
    }

    fn bind_halt_flag(&mut self, flag: HaltFlag) {
        self.halt = flag;
    }

    fn name(&self) -> &'static str {
        "DepthSortStage"
    }
}

/// Opaque grouped by render state then depth, then transparent back to front
#[derive(Debug, Default)]
pub struct StateSortStage {
    halt: HaltFlag,
}

impl StateSortStage {
    /// Create the stage
    pub fn new() -> Self {
        Self::default()
    }
}

impl SortStage for StateSortStage {
    fn sort(&mut self, frame: CulledFrame) -> CulledFrame {
        sort_frame(frame, &self.halt, compare_state)
    }

    fn bind_halt_flag(&mut self, flag: HaltFlag) {
        self.halt = flag;
    }

    fn name(&self) -> &'static str {
        "StateSortStage"
    }
}

fn compare_depth(a: &GraphicsDetails, b: &GraphicsDetails) -> Ordering {
    match (a.transparent, b.transparent) {
        (false, false) => a.distance.total_cmp(&b.distance),
        (true, true) => b.distance.total_cmp(&a.distance),
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
    }
}

fn compare_state(a: &GraphicsDetails, b: &GraphicsDetails) -> Ordering {
    match (a.transparent, b.transparent) {
        (false, false) => a.state_key.cmp(&b.state_key).then(a.distance.total_cmp(&b.distance)),
        _ => compare_depth(a, b),
    }
}

/// One START..STOP block
#[derive(Debug)]
struct Block {
    start: usize,
    stop: usize,
    children: Vec<Block>,
}

/// Parse a well-paired sequence into sibling blocks; `None` if unpaired
fn parse_blocks(ops: &[RenderOp]) -> Option<Vec<Block>> {
    let mut stack: Vec<Block> = vec![Block { start: 0, stop: 0, children: Vec::new() }];
    for (index, op) in ops.iter().enumerate() {
        match op {
            RenderOp::Start(_) => stack.push(Block { start: index, stop: index, children: Vec::new() }),
            RenderOp::Stop(details) => {
                if stack.len() < 2 {
                    return None;
                }
                let mut block = stack.pop()?;
                if ops[block.start].details().node != details.node {
                    return None;
                }
                block.stop = index;
                stack.last_mut()?.children.push(block);
            }
        }
    }
    if stack.len() != 1 {
        return None;
    }
    stack.pop().map(|root| root.children)
}

fn order_blocks<F>(ops: &[RenderOp], blocks: &mut [Block], compare: &F, out: &mut Vec<RenderOp>)
where
    F: Fn(&GraphicsDetails, &GraphicsDetails) -> Ordering,
{
    blocks.sort_by(|a, b| compare(ops[a.start].details(), ops[b.start].details()));
    for block in blocks.iter_mut() {
        out.push(ops[block.start].clone());
        order_blocks(ops, &mut block.children, compare, out);
        out.push(ops[block.stop].clone());
    }
}

fn sort_frame<F>(mut frame: CulledFrame, halt: &HaltFlag, compare: F) -> CulledFrame
where
    F: Fn(&GraphicsDetails, &GraphicsDetails) -> Ordering,
{
    for pass in &mut frame.passes {
        if halt.is_raised() {
            break;
        }
        let Some(mut blocks) = parse_blocks(&pass.ops) else {
            log::warn!("Leaving unpaired render op sequence unsorted");
            continue;
        };
        let mut sorted = Vec::with_capacity(pass.ops.len());
        order_blocks(&pass.ops, &mut blocks, &compare, &mut sorted);
        pass.ops = sorted;
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4;
    use crate::pipeline::render_op::{is_well_paired, EnvironmentData, RenderPass};
    use crate::pipeline::NullRenderable;
    use crate::scene::{NodeId, NodeKind, ProjectionType, SceneGraph};
    use std::sync::Arc;

    struct Fixture {
        graph: SceneGraph,
    }

    impl Fixture {
        fn new() -> Self {
            Self { graph: SceneGraph::new() }
        }

        fn details(&mut self, distance: f32, transparent: bool, state_key: u64) -> GraphicsDetails {
            GraphicsDetails {
                transform: Mat4::identity(),
                world_transform: Mat4::identity(),
                renderable: Arc::new(NullRenderable),
                node: self.graph.create_node(NodeKind::Group),
                triangle_count: 0,
                transparent,
                state_key,
                distance,
            }
        }
    }

    fn pair(details: &GraphicsDetails) -> [RenderOp; 2] {
        [RenderOp::Start(details.clone()), RenderOp::Stop(details.clone())]
    }

    fn frame_of(ops: Vec<RenderOp>) -> CulledFrame {
        CulledFrame {
            passes: vec![RenderPass {
                environment: EnvironmentData {
                    viewport: (0, 0, 1, 1),
                    projection_type: ProjectionType::default(),
                    projection: Mat4::identity(),
                    view: Mat4::identity(),
                    viewpoint_transform: Mat4::identity(),
                    background: None,
                    fog: None,
                },
                ops,
            }],
        }
    }

    fn start_order(frame: &CulledFrame) -> Vec<NodeId> {
        frame.passes[0].ops.iter().filter(|op| op.is_start()).map(|op| op.details().node).collect()
    }

    fn all_nodes(frame: &CulledFrame) -> Vec<NodeId> {
        frame.passes[0].ops.iter().map(|op| op.details().node).collect()
    }

    #[test]
    fn test_equal_keys_keep_cull_order() {
        let mut fixture = Fixture::new();
        let entries: Vec<GraphicsDetails> = (0..5).map(|_| fixture.details(3.0, false, 1)).collect();
        let ops: Vec<RenderOp> = entries.iter().flat_map(pair).collect();
        let frame = frame_of(ops);
        let expected = all_nodes(&frame);

        for stage in [
            &mut DepthSortStage::new() as &mut dyn SortStage,
            &mut StateSortStage::new(),
            &mut NullSortStage::new(),
        ] {
            let sorted = stage.sort(frame.clone());
            assert_eq!(all_nodes(&sorted), expected, "{} reordered ties", stage.name());
        }
    }

    #[test]
    fn test_depth_sort_orders_opaque_then_transparent() {
        let mut fixture = Fixture::new();
        let far_glass = fixture.details(10.0, true, 0);
        let near_wall = fixture.details(2.0, false, 0);
        let near_glass = fixture.details(1.0, true, 0);
        let far_wall = fixture.details(8.0, false, 0);
        let ops = [&far_glass, &near_wall, &near_glass, &far_wall].into_iter().flat_map(pair).collect();

        let sorted = DepthSortStage::new().sort(frame_of(ops));
        assert_eq!(start_order(&sorted), vec![near_wall.node, far_wall.node, far_glass.node, near_glass.node]);
        assert!(sorted.is_well_formed());
    }

    #[test]
    fn test_state_sort_groups_by_key() {
        let mut fixture = Fixture::new();
        let a = fixture.details(1.0, false, 2);
        let b = fixture.details(2.0, false, 1);
        let c = fixture.details(3.0, false, 2);
        let d = fixture.details(0.5, false, 1);
        let ops = [&a, &b, &c, &d].into_iter().flat_map(pair).collect();

        let sorted = StateSortStage::new().sort(frame_of(ops));
        assert_eq!(start_order(&sorted), vec![d.node, b.node, a.node, c.node]);
    }

    #[test]
    fn test_blocks_move_with_their_subtree() {
        let mut fixture = Fixture::new();
        let effect = fixture.details(9.0, false, 0);
        let inside_far = fixture.details(6.0, false, 0);
        let inside_near = fixture.details(5.0, false, 0);
        let outside = fixture.details(1.0, false, 0);

        let mut ops = vec![RenderOp::Start(effect.clone())];
        ops.extend(pair(&inside_far));
        ops.extend(pair(&inside_near));
        ops.push(RenderOp::Stop(effect.clone()));
        ops.extend(pair(&outside));
        let original_len = ops.len();

        let sorted = DepthSortStage::new().sort(frame_of(ops));
        let sorted_ops = &sorted.passes[0].ops;
        assert_eq!(sorted_ops.len(), original_len);
        assert!(is_well_paired(sorted_ops));
        assert_eq!(
            all_nodes(&sorted),
            vec![
                outside.node,
                outside.node,
                effect.node,
                inside_near.node,
                inside_near.node,
                inside_far.node,
                inside_far.node,
                effect.node,
            ]
        );
    }

    #[test]
    fn test_unpaired_sequence_left_alone() {
        let mut fixture = Fixture::new();
        let a = fixture.details(5.0, false, 0);
        let b = fixture.details(1.0, false, 0);
        let ops = vec![RenderOp::Start(a.clone()), RenderOp::Start(b.clone()), RenderOp::Stop(b)];
        let frame = frame_of(ops);
        let expected = all_nodes(&frame);

        let sorted = DepthSortStage::new().sort(frame);
        assert_eq!(all_nodes(&sorted), expected);
    }
}
