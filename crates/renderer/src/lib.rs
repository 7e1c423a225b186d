//! Frame loop for shader demos: clocks, multi-pass programs, capture and the
//! window/GPU target they render through.

mod audio;
mod capture;
pub mod gpu;
mod playback;
mod programs;
mod render_loop;
mod shaders;
mod time;
mod window;

pub use audio::{Synthesizer, WavSynthesizer};
pub use capture::{CaptureError, CaptureFormat, DiscardSink, FrameSink, RgbFrame, SequenceWriter};
pub use programs::{
    PassProgram, PassSources, ProgramBackend, ProgramError, ProgramTable, RecompileOutcome,
    ShaderError,
};
pub use render_loop::{FrameTarget, LoopControl, LoopExit, RenderLoop};
pub use shaders::{
    compose_pass, compose_stage, fallback_pass, SharedSource, DEFAULT_VERTEX, FALLBACK_FRAGMENT,
    PRELUDE,
};
pub use time::{
    time_source_for_policy, BoxedTimeSource, CaptureClock, ClockPolicy, RealtimeClock,
    SynthesizerClock, TimeSource,
};
pub use window::{WindowConfig, WindowTarget};
