use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{EventLoop, EventLoopBuilder};
use winit::keyboard::{Key, NamedKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Fullscreen, Window, WindowBuilder};

use crate::capture::RgbFrame;
use crate::gpu::{FrameGraph, GpuContext, WgpuBackend};
use crate::programs::ProgramTable;
use crate::render_loop::{FrameTarget, LoopControl};

#[derive(Debug, Clone, PartialEq)]
pub struct WindowConfig {
    pub title: String,
    /// Size of the window on screen.
    pub window_size: (u32, u32),
    /// Size every pass renders at; captured frames have this size.
    pub render_size: (u32, u32),
    pub fullscreen: bool,
    pub vsync: bool,
}

/// Window plus GPU surface, driven one frame at a time by the render loop.
pub struct WindowTarget {
    frame: Option<wgpu::SurfaceTexture>,
    graph: FrameGraph,
    gpu: GpuContext,
    window: Arc<Window>,
    event_loop: EventLoop<()>,
}

impl WindowTarget {
    /// Opens the window and returns it with the backend programs are built on.
    pub fn open(config: &WindowConfig, pass_count: usize) -> Result<(Self, WgpuBackend)> {
        let (render_width, render_height) = config.render_size;
        if render_width == 0 || render_height == 0 {
            return Err(anyhow!(
                "render size must be positive, got {render_width}x{render_height}"
            ));
        }

        let event_loop = EventLoopBuilder::new()
            .build()
            .context("failed to create event loop")?;
        let mut builder = WindowBuilder::new()
            .with_title(config.title.clone())
            .with_inner_size(PhysicalSize::new(
                config.window_size.0.max(1),
                config.window_size.1.max(1),
            ));
        if config.fullscreen {
            builder = builder.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        let window = Arc::new(builder.build(&event_loop).context("failed to create window")?);

        let gpu = GpuContext::new(Arc::clone(&window), config.vsync)?;
        let limit = gpu.device.limits().max_texture_dimension_2d;
        if render_width > limit || render_height > limit {
            return Err(anyhow!(
                "GPU max texture dimension is {limit}, requested render size is {render_width}x{render_height}"
            ));
        }

        let backend = WgpuBackend::new(&gpu.device, pass_count);
        let graph = FrameGraph::new(
            &gpu.device,
            &gpu.queue,
            &backend,
            pass_count,
            config.render_size,
            gpu.surface_format,
        )?;
        tracing::info!(
            width = render_width,
            height = render_height,
            passes = pass_count,
            "window ready"
        );

        Ok((
            Self {
                frame: None,
                graph,
                gpu,
                window,
                event_loop,
            },
            backend,
        ))
    }

    pub fn render_size(&self) -> (u32, u32) {
        self.graph.size()
    }

    fn acquire(&mut self) -> Option<wgpu::SurfaceTexture> {
        match self.gpu.surface.get_current_texture() {
            Ok(frame) => Some(frame),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.gpu.reconfigure();
                self.gpu.surface.get_current_texture().ok()
            }
            Err(err) => {
                tracing::warn!(error = %err, "skipping surface for this frame");
                None
            }
        }
    }
}

impl FrameTarget for WindowTarget {
    type Backend = WgpuBackend;

    fn pump_events(&mut self) -> LoopControl {
        let window_id = self.window.id();
        let mut control = LoopControl::Continue;
        let mut resized = None;

        let status = self
            .event_loop
            .pump_events(Some(Duration::ZERO), |event, _elwt| {
                let Event::WindowEvent { window_id: id, event } = event else {
                    return;
                };
                if id != window_id {
                    return;
                }
                match event {
                    WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                        control = LoopControl::Exit;
                    }
                    WindowEvent::KeyboardInput { event, .. }
                        if event.state == ElementState::Pressed
                            && matches!(event.logical_key, Key::Named(NamedKey::Escape)) =>
                    {
                        control = LoopControl::Exit;
                    }
                    WindowEvent::Resized(size) => resized = Some(size),
                    _ => {}
                }
            });

        if let PumpStatus::Exit(code) = status {
            tracing::debug!(code, "event loop exited");
            control = LoopControl::Exit;
        }
        if let Some(size) = resized {
            self.gpu.resize(size);
        }
        control
    }

    fn draw(&mut self, time: f64, programs: &ProgramTable<WgpuBackend>) -> Result<()> {
        let frame = self.acquire();
        let view = frame
            .as_ref()
            .map(|frame| frame.texture.create_view(&wgpu::TextureViewDescriptor::default()));
        let commands = self.graph.encode(
            &self.gpu.device,
            &self.gpu.queue,
            time,
            programs,
            view.as_ref(),
        );
        self.gpu.queue.submit(Some(commands));
        self.frame = frame;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RgbFrame> {
        self.graph.read_final(&self.gpu.device, &self.gpu.queue)
    }

    fn present(&mut self) -> Result<()> {
        if let Some(frame) = self.frame.take() {
            self.window.pre_present_notify();
            frame.present();
        }
        Ok(())
    }
}
