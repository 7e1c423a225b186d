use anyhow::{Context, Result};
use livereload::{HttpRequestQueue, PollOutcome, ReloadServer, RequestQueue};

use crate::capture::{FrameSink, RgbFrame};
use crate::programs::{ProgramBackend, ProgramTable};
use crate::time::BoxedTimeSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    /// Escape was pressed or the window was closed.
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    Finished,
}

/// Window and GPU surface the loop renders into.
pub trait FrameTarget {
    type Backend: ProgramBackend;

    /// Drains pending window events without blocking.
    fn pump_events(&mut self) -> LoopControl;
    /// Renders every pass in order with `time` bound as the shader clock.
    fn draw(&mut self, time: f64, programs: &ProgramTable<Self::Backend>) -> Result<()>;
    /// Reads back the frame produced by the last [`draw`](Self::draw).
    fn read_frame(&mut self) -> Result<RgbFrame>;
    fn present(&mut self) -> Result<()>;
}

/// Drives time, drawing, live reload and capture once per frame.
pub struct RenderLoop<Q: RequestQueue = HttpRequestQueue> {
    clock: BoxedTimeSource,
    sink: Box<dyn FrameSink>,
    server: Option<ReloadServer<Q>>,
    close_when_finished: bool,
    frames: u64,
}

impl<Q: RequestQueue> RenderLoop<Q> {
    pub fn new(
        clock: BoxedTimeSource,
        sink: Box<dyn FrameSink>,
        server: Option<ReloadServer<Q>>,
        close_when_finished: bool,
    ) -> Self {
        Self {
            clock,
            sink,
            server,
            close_when_finished,
            frames: 0,
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    pub fn server(&self) -> Option<&ReloadServer<Q>> {
        self.server.as_ref()
    }

    /// Runs until cancelled or, when configured, until the clock finishes.
    /// The reload endpoint is unbound before this returns, even on error.
    pub fn run<T: FrameTarget>(
        &mut self,
        target: &mut T,
        programs: &mut ProgramTable<T::Backend>,
    ) -> Result<LoopExit> {
        let result = self.drive(target, programs);
        if let Some(server) = self.server.as_mut() {
            server.shutdown();
        }
        match &result {
            Ok(exit) => tracing::info!(frames = self.frames, ?exit, "render loop ended"),
            Err(err) => tracing::error!(frames = self.frames, "render loop failed: {err:#}"),
        }
        result
    }

    fn drive<T: FrameTarget>(
        &mut self,
        target: &mut T,
        programs: &mut ProgramTable<T::Backend>,
    ) -> Result<LoopExit> {
        self.clock.start().context("failed to start time source")?;
        tracing::debug!(
            duration = ?self.clock.duration(),
            close_when_finished = self.close_when_finished,
            "render loop started"
        );

        loop {
            if target.pump_events() == LoopControl::Exit {
                return Ok(LoopExit::Cancelled);
            }

            let time = self.clock.current_time();
            target
                .draw(time, programs)
                .with_context(|| format!("failed to draw frame {}", self.frames))?;

            if let Some(server) = self.server.as_mut() {
                if let PollOutcome::Served { status, route, .. } = server.poll(programs) {
                    tracing::debug!(status, ?route, frame = self.frames, "reload request served");
                }
            }

            if self.sink.wants_frames() {
                let frame = target
                    .read_frame()
                    .with_context(|| format!("failed to read back frame {}", self.frames))?;
                self.sink
                    .write_frame(&frame)
                    .with_context(|| format!("failed to capture frame {}", self.frames))?;
            }

            target
                .present()
                .with_context(|| format!("failed to present frame {}", self.frames))?;
            self.clock.advance_frame();
            self.frames += 1;

            if self.close_when_finished && self.clock.is_finished() {
                return Ok(LoopExit::Finished);
            }
        }
    }
}
