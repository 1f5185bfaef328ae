//! Dedicated render thread
//!
//! [`RenderManager`] moves a [`RenderLoop`] onto its own thread. The
//! application talks to it through a command channel and sends scene
//! changes through [`UpdateHandle`]s; both are drained by the render thread
//! between frames.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::pipeline::orchestrator::{FrameStatus, HaltHandle};
use crate::pipeline::profiling::{ProfilingData, RequestData};
use crate::pipeline::render_loop::RenderLoop;
use crate::scene::{Layer, UpdateHandle};

/// Poll interval while there is nothing to draw
const IDLE_WAIT: Duration = Duration::from_millis(16);

/// Requests handled by the render thread between frames
#[derive(Debug)]
pub enum RenderCommand {
    /// Replace the rendered layers
    SetLayers(Vec<Layer>),
    /// Parameters for the next frame
    SetRequestData(RequestData),
    /// Change the frame spacing floor in milliseconds
    SetMinimumFrameInterval(u32),
    /// Redraw the last frame
    Repaint,
    /// Halt the pipeline and leave the thread
    Halt,
}

/// Owner of the render thread
#[derive(Debug)]
pub struct RenderManager {
    commands: flume::Sender<RenderCommand>,
    updates: UpdateHandle,
    halt: HaltHandle,
    profiling: Arc<Mutex<ProfilingData>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RenderManager {
    /// Start rendering frames on a new thread
    pub fn spawn(render_loop: RenderLoop) -> std::io::Result<Self> {
        let (commands, receiver) = flume::unbounded();
        let updates = render_loop.update_handle();
        let halt = render_loop.pipeline().halt_handle();
        let profiling = Arc::new(Mutex::new(ProfilingData::default()));
        let shared_profiling = Arc::clone(&profiling);

        let thread = thread::Builder::new()
            .name("render".to_string())
            .spawn(move || run(render_loop, &receiver, &shared_profiling))?;

        log::info!("Render thread started");
        Ok(Self {
            commands,
            updates,
            halt,
            profiling,
            thread: Some(thread),
        })
    }

    fn send(&self, command: RenderCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Replace the rendered layers
    pub fn set_layers(&self, layers: Vec<Layer>) -> bool {
        self.send(RenderCommand::SetLayers(layers))
    }

    /// Parameters for the next frame
    pub fn set_request_data(&self, request: RequestData) -> bool {
        self.send(RenderCommand::SetRequestData(request))
    }

    /// Change the frame spacing floor
    pub fn set_minimum_frame_interval(&self, interval_ms: u32) -> bool {
        self.send(RenderCommand::SetMinimumFrameInterval(interval_ms))
    }

    /// Redraw the last frame
    pub fn repaint(&self) -> bool {
        self.send(RenderCommand::Repaint)
    }

    /// Sender for scene changes
    pub fn update_handle(&self) -> UpdateHandle {
        self.updates.clone()
    }

    /// Handle that halts the pipeline from any thread
    pub fn halt_handle(&self) -> HaltHandle {
        self.halt.clone()
    }

    /// Counters from the most recent frame
    pub fn profiling(&self) -> ProfilingData {
        self.profiling.lock().clone()
    }

    /// Whether the render thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, thread::JoinHandle::is_finished)
    }

    /// Halt the pipeline and wait for the render thread
    pub fn shutdown(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        self.halt.halt();
        self.send(RenderCommand::Halt);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Render thread panicked");
            } else {
                log::info!("Render thread stopped");
            }
        }
    }
}

impl Drop for RenderManager {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

fn run(mut render_loop: RenderLoop, commands: &flume::Receiver<RenderCommand>, profiling: &Mutex<ProfilingData>) {
    loop {
        let mut halt = false;
        loop {
            match commands.try_recv() {
                Ok(command) => halt |= apply(&mut render_loop, command),
                Err(flume::TryRecvError::Empty) => break,
                Err(flume::TryRecvError::Disconnected) => {
                    halt = true;
                    break;
                }
            }
        }
        if halt {
            render_loop.halt();
            break;
        }

        let status = render_loop.run_frame();
        *profiling.lock() = render_loop.profiling().clone();

        match status {
            FrameStatus::Drawn | FrameStatus::DrawFailed => {}
            // Nothing to draw; wait for a command instead of spinning
            FrameStatus::Skipped => match commands.recv_timeout(IDLE_WAIT) {
                Ok(command) => {
                    if apply(&mut render_loop, command) {
                        render_loop.halt();
                        break;
                    }
                }
                Err(flume::RecvTimeoutError::Timeout) => {}
                Err(flume::RecvTimeoutError::Disconnected) => {
                    render_loop.halt();
                    break;
                }
            },
            FrameStatus::Terminated | FrameStatus::Halted => break,
        }
    }
}

/// Apply one command; returns true on halt
fn apply(render_loop: &mut RenderLoop, command: RenderCommand) -> bool {
    match command {
        RenderCommand::SetLayers(layers) => render_loop.set_layers(layers),
        RenderCommand::SetRequestData(request) => render_loop.set_request_data(request),
        RenderCommand::SetMinimumFrameInterval(interval_ms) => render_loop.set_minimum_frame_interval(interval_ms),
        RenderCommand::Repaint => {
            render_loop.repaint();
        }
        RenderCommand::Halt => return true,
    }
    false
}
