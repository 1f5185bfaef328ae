//! Single-threaded frame driver
//!
//! One frame is: wait for the frame spacing floor, notify the update
//! observer, run the update barrier, render, swap. The observer callback
//! and the barrier are the only points where live nodes change.

use crate::pipeline::orchestrator::{FrameStatus, RenderPipeline};
use crate::pipeline::profiling::{ProfilingData, RequestData};
use crate::scene::{collect_roots, Layer, SceneGraph, UpdateHandle, UpdateQueue};

/// Application hook called once per frame before culling
pub trait UpdateObserver: Send {
    /// Mutate the scene graph; writes to live nodes apply at this frame's barrier
    fn update_scene_graph(&mut self, graph: &mut SceneGraph, frame_number: u64);

    /// Called once when the pipeline terminates
    fn app_shutdown(&mut self) {}
}

/// Owns the graph and the pipeline and runs frames on the calling thread
pub struct RenderLoop {
    graph: SceneGraph,
    pipeline: RenderPipeline,
    updates: UpdateQueue,
    observer: Option<Box<dyn UpdateObserver>>,
    profiling: ProfilingData,
    shutdown_notified: bool,
}

impl std::fmt::Debug for RenderLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderLoop")
            .field("pipeline", &self.pipeline)
            .field("nodes", &self.graph.node_count())
            .field("frame", &self.profiling.frame_number)
            .finish_non_exhaustive()
    }
}

impl RenderLoop {
    /// Create a loop around a wired pipeline
    pub fn new(graph: SceneGraph, pipeline: RenderPipeline) -> Self {
        Self {
            graph,
            pipeline,
            updates: UpdateQueue::new(),
            observer: None,
            profiling: ProfilingData::default(),
            shutdown_notified: false,
        }
    }

    /// Install the per-frame observer
    pub fn set_observer(&mut self, observer: Box<dyn UpdateObserver>) {
        self.observer = Some(observer);
    }

    /// Sender for updates from other threads
    pub fn update_handle(&self) -> UpdateHandle {
        self.updates.handle()
    }

    /// Replace the rendered layers and recompute live nodes
    pub fn set_layers(&mut self, layers: Vec<Layer>) {
        self.graph.set_live_roots(collect_roots(&layers));
        self.pipeline.set_layers(layers);
    }

    /// Parameters for the next frame only
    pub fn set_request_data(&mut self, request: RequestData) {
        self.pipeline.set_request_data(request);
    }

    /// Floor on the spacing between frames; zero means uncapped
    pub fn set_minimum_frame_interval(&mut self, interval_ms: u32) {
        self.pipeline.set_minimum_frame_interval(interval_ms);
    }

    /// Scene graph; writes to live nodes are deferred to the next barrier
    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    /// Mutable scene graph
    pub fn graph_mut(&mut self) -> &mut SceneGraph {
        &mut self.graph
    }

    /// The pipeline
    pub fn pipeline(&self) -> &RenderPipeline {
        &self.pipeline
    }

    /// Mutable pipeline, for rewiring stages while idle
    pub fn pipeline_mut(&mut self) -> &mut RenderPipeline {
        &mut self.pipeline
    }

    /// Counters from the last frame
    pub fn profiling(&self) -> &ProfilingData {
        &self.profiling
    }

    /// Run one complete frame
    pub fn run_frame(&mut self) -> FrameStatus {
        if self.pipeline.is_halted() {
            self.notify_shutdown();
            return FrameStatus::Halted;
        }

        self.pipeline.wait_for_next_frame();

        if let Some(observer) = self.observer.as_mut() {
            observer.update_scene_graph(&mut self.graph, self.profiling.frame_number + 1);
        }
        let report = self.graph.process_updates(self.updates.drain());
        for error in &report.errors {
            self.pipeline.error_reporter().error(&format!("Scene update failed: {error}"));
        }

        let status = self.pipeline.render(&self.graph, &mut self.profiling);
        match status {
            FrameStatus::Drawn | FrameStatus::DrawFailed => {
                self.pipeline.swap_buffers();
            }
            FrameStatus::Terminated | FrameStatus::Halted => self.notify_shutdown(),
            FrameStatus::Skipped => {}
        }
        status
    }

    /// Redraw the last frame, for expose events
    pub fn repaint(&mut self) -> FrameStatus {
        let status = self.pipeline.display_only(&mut self.profiling);
        match status {
            FrameStatus::Drawn | FrameStatus::DrawFailed => {
                self.pipeline.swap_buffers();
            }
            FrameStatus::Terminated | FrameStatus::Halted => self.notify_shutdown(),
            FrameStatus::Skipped => {}
        }
        status
    }

    /// Halt the pipeline and notify the observer
    pub fn halt(&mut self) {
        self.pipeline.halt();
        self.notify_shutdown();
    }

    fn notify_shutdown(&mut self) {
        if self.shutdown_notified {
            return;
        }
        self.shutdown_notified = true;
        if let Some(observer) = self.observer.as_mut() {
            observer.app_shutdown();
        }
    }
}
