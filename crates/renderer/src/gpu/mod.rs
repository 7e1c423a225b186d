//! wgpu side of the renderer.
//!
//! - `context` owns instance/device/surface wiring.
//! - `backend` compiles GLSL stages and links them into pass pipelines.
//! - `frame` owns the offscreen pass chain, the surface blit and capture
//!   readback.
//! - `uniforms` mirrors the `FrameParams` block of the shader prelude.

mod backend;
mod context;
mod frame;
mod uniforms;

pub use backend::WgpuBackend;
pub use uniforms::FrameUniforms;

pub(crate) use context::GpuContext;
pub(crate) use frame::FrameGraph;
