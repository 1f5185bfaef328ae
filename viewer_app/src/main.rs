//! Headless Viewer Demo
//!
//! Builds a small scene and drives it on the render thread with a recording
//! graphics context:
//! - A ring of crates spinning around the origin
//! - A hull with two detail levels that switches as the camera pulls back
//! - A beacon switch toggled from the application thread
//! - A transparent pane inside a scoped light effect
//! - A shared tree instanced twice
//!
//! Usage: `viewer [settings.toml|settings.ron]`

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use scene_pipeline::config::{Config, ConfigError, PipelineSettings};
use scene_pipeline::foundation::logging;
use scene_pipeline::foundation::math::{Mat4, Mat4Ext, Transform, Vec3};
use scene_pipeline::pipeline::{
    DeviceError, GraphicsCommand, PrimitiveRenderable, RecordingContext, RenderLoop, RenderManager, UpdateObserver,
};
use scene_pipeline::scene::{
    Bounds, Layer, LevelOfDetail, NodeChange, NodeId, NodeKind, Scene, SceneError, SceneGraph, Shape, Viewport,
};

const RUN_TIME: Duration = Duration::from_secs(3);
const REPORT_INTERVAL: Duration = Duration::from_millis(500);
const BEACON_INTERVAL: Duration = Duration::from_millis(250);

const NUM_CRATES: usize = 8;
const CRATE_RING_RADIUS: f32 = 4.0;
const SPIN_SPEED: f32 = 0.02; // radians per frame
const CAMERA_START: f32 = 12.0;
const CAMERA_END: f32 = 30.0;
const DOLLY_SPEED: f32 = 0.1; // units per frame
const HULL_DETAIL_RANGE: f32 = 20.0;

#[derive(thiserror::Error, Debug)]
enum ViewerError {
    #[error("Settings error: {0}")]
    Config(#[from] ConfigError),

    #[error("Output device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    #[error("Render thread error: {0}")]
    Io(#[from] std::io::Error),
}

/// Node handles the demo animates
struct DemoScene {
    graph: SceneGraph,
    root: NodeId,
    viewpoint: NodeId,
    background: NodeId,
    rig: NodeId,
    spinner: NodeId,
    beacon: NodeId,
}

fn unit_box(half: f32) -> Bounds {
    Bounds::from_corners(Vec3::new(-half, -half, -half), Vec3::new(half, half, half))
}

fn primitive_shape(graph: &mut SceneGraph, label: &str, triangles: u32, half: f32) -> NodeId {
    let renderable = Arc::new(PrimitiveRenderable::new(label, triangles));
    graph.create_named(label, NodeKind::Shape(Shape::new(renderable, unit_box(half)).with_triangles(triangles)))
}

fn build_scene() -> Result<DemoScene, SceneError> {
    let mut graph = SceneGraph::new();
    let root = graph.create_named("root", NodeKind::Group);

    // Camera rig
    let rig = graph.create_transform_group(Mat4::translation(0.0, 2.0, CAMERA_START));
    let viewpoint = graph.create_viewpoint();
    let _ = graph.add_child(rig, viewpoint)?;
    let _ = graph.add_child(root, rig)?;
    let background = graph.create_background(Arc::new(PrimitiveRenderable::new("sky", 2)));

    // Spinning crate ring
    let spinner = graph.create_transform_group(Mat4::identity());
    for i in 0..NUM_CRATES {
        let angle = i as f32 * std::f32::consts::TAU / NUM_CRATES as f32;
        let slot = graph.create_transform_group(
            Mat4::translation(CRATE_RING_RADIUS * angle.cos(), 0.0, CRATE_RING_RADIUS * angle.sin()),
        );
        let renderable = Arc::new(PrimitiveRenderable::new(format!("crate-{i}"), 12));
        let crate_shape = graph.create_shape(Shape::new(renderable, unit_box(0.5)).with_triangles(12).with_state_key((i % 3) as u64));
        let _ = graph.add_child(slot, crate_shape)?;
        let _ = graph.add_child(spinner, slot)?;
    }
    let _ = graph.add_child(root, spinner)?;

    // Hull with two detail levels
    let hull_anchor = graph.create_transform_group(Mat4::translation(0.0, 0.0, -6.0));
    let hull = graph.create_lod(LevelOfDetail::new(Vec3::zeros(), vec![HULL_DETAIL_RANGE]));
    let hull_high = primitive_shape(&mut graph, "hull-high", 1200, 2.0);
    let hull_low = primitive_shape(&mut graph, "hull-low", 120, 2.0);
    let _ = graph.add_child(hull, hull_high)?;
    let _ = graph.add_child(hull, hull_low)?;
    let _ = graph.add_child(hull_anchor, hull)?;
    let _ = graph.add_child(root, hull_anchor)?;

    // Beacon
    let beacon = graph.create_switch();
    let beacon_on = primitive_shape(&mut graph, "beacon-on", 20, 0.25);
    let beacon_off = primitive_shape(&mut graph, "beacon-off", 20, 0.25);
    let _ = graph.add_child(beacon, beacon_on)?;
    let _ = graph.add_child(beacon, beacon_off)?;
    let _ = graph.set_active_child(beacon, Some(0))?;
    let beacon_mount = graph.create_transform_group(Mat4::translation(0.0, 3.0, -6.0));
    let _ = graph.add_child(beacon_mount, beacon)?;
    let _ = graph.add_child(root, beacon_mount)?;

    // Transparent pane lit by a scoped light
    let light = graph.create_effect(Arc::new(PrimitiveRenderable::new("spotlight", 0)));
    let pane = graph.create_shape(
        Shape::new(Arc::new(PrimitiveRenderable::new("glass", 2)), unit_box(1.0))
            .with_triangles(2)
            .with_transparency(true),
    );
    let _ = graph.add_child(light, pane)?;
    let _ = graph.add_child(root, light)?;

    // Shared tree, instanced twice
    let tree = graph.create_shared_group();
    let trunk = primitive_shape(&mut graph, "tree", 300, 1.0);
    let _ = graph.add_child(tree, trunk)?;
    for (x, scale) in [(-8.0, 1.0), (8.0, 1.5)] {
        let placement = Transform::from_translation(Vec3::new(x, 0.0, -2.0)).with_uniform_scale(scale);
        let instance = graph.create_transform_group(placement.to_matrix());
        let _ = graph.add_child(instance, tree)?;
        let _ = graph.add_child(root, instance)?;
    }

    log::info!("Scene built with {} nodes", graph.node_count());
    Ok(DemoScene { graph, root, viewpoint, background, rig, spinner, beacon })
}

/// Spins the crate ring and pulls the camera back, once per frame
struct Animator {
    spinner: NodeId,
    rig: NodeId,
    angle: f32,
    camera_z: f32,
}

impl UpdateObserver for Animator {
    fn update_scene_graph(&mut self, graph: &mut SceneGraph, _frame_number: u64) {
        self.angle = (self.angle + SPIN_SPEED) % std::f32::consts::TAU;
        self.camera_z = (self.camera_z + DOLLY_SPEED).min(CAMERA_END);

        if let Err(e) = graph.set_transform(self.spinner, Mat4::rotation_y(self.angle)) {
            log::warn!("Could not spin crates: {}", e);
        }
        if let Err(e) = graph.set_transform(self.rig, Mat4::translation(0.0, 2.0, self.camera_z)) {
            log::warn!("Could not move camera: {}", e);
        }
    }

    fn app_shutdown(&mut self) {
        log::info!("Animator stopped at angle {:.2}, camera z {:.1}", self.angle, self.camera_z);
    }
}

fn load_settings() -> Result<PipelineSettings, ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => PipelineSettings::load_from_file(path),
        None => Ok(PipelineSettings::default().with_minimum_frame_interval(16)),
    }
}

fn run() -> Result<(), ViewerError> {
    let settings = load_settings()?;
    logging::init_with_level(&settings.log_level);
    settings.validate()?;
    log::info!("Viewer settings: {:?}", settings);

    let context = RecordingContext::new();
    let recording = context.handle();
    let device = settings.create_device(context)?;
    let pipeline = settings.build_pipeline(Box::new(device))?;

    let demo = build_scene()?;
    let scene = Scene::new(demo.root).with_viewpoint(demo.viewpoint).with_background(demo.background);
    let layers = vec![Layer::single(Viewport::new(0, 0, 1280, 720, scene))];

    let mut render_loop = RenderLoop::new(demo.graph, pipeline);
    render_loop.set_observer(Box::new(Animator {
        spinner: demo.spinner,
        rig: demo.rig,
        angle: 0.0,
        camera_z: CAMERA_START,
    }));

    let manager = RenderManager::spawn(render_loop)?;
    manager.set_layers(layers);
    let updates = manager.update_handle();

    let start = Instant::now();
    let mut last_report = start;
    let mut last_toggle = start;
    let mut beacon_on = true;
    while start.elapsed() < RUN_TIME && !manager.is_finished() {
        thread::sleep(Duration::from_millis(10));

        if last_toggle.elapsed() >= BEACON_INTERVAL {
            beacon_on = !beacon_on;
            let active = if beacon_on { 0 } else { 1 };
            updates.submit(demo.beacon, NodeChange::SetActiveChild(Some(active)));
            last_toggle = Instant::now();
        }

        if last_report.elapsed() >= REPORT_INTERVAL {
            let profiling = manager.profiling();
            log::info!(
                "Frame {}: {} renderables, {} triangles, {} draw calls, cull {:?} / sort {:?} / draw {:?}",
                profiling.frame_number,
                profiling.num_renderables,
                profiling.num_triangles,
                profiling.num_draw_calls,
                profiling.cull_time,
                profiling.sort_time,
                profiling.draw_time
            );
            last_report = Instant::now();
        }
    }

    let frames = manager.profiling().frame_number;
    manager.shutdown();

    let high = recording.count(|c| matches!(c, GraphicsCommand::Draw { label, .. } if label == "hull-high"));
    let low = recording.count(|c| matches!(c, GraphicsCommand::Draw { label, .. } if label == "hull-low"));
    log::info!("Rendered {} frames; hull drawn {} times at high detail, {} at low", frames, high, low);
    log::info!("Recorded {} graphics commands", recording.commands().len());
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        log::error!("Viewer failed: {}", e);
        eprintln!("Viewer failed: {e}");
        std::process::exit(1);
    }
}
