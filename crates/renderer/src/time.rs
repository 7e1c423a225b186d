use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};

use crate::audio::{Synthesizer, WavSynthesizer};
use crate::playback::{AudioOutput, BlockSource};

/// Abstraction over where the render loop's time values originate from.
pub trait TimeSource: Send {
    /// One-time initialisation. Must run before the first [`current_time`](Self::current_time).
    fn start(&mut self) -> Result<()>;
    /// Seconds elapsed since [`start`](Self::start). Never decreases.
    fn current_time(&self) -> f64;
    fn is_finished(&self) -> bool;
    /// Total length in seconds, `None` when unbounded.
    fn duration(&self) -> Option<f64>;
    /// Called once per loop iteration after the frame has been handed off.
    fn advance_frame(&mut self) {}
}

/// Convenient alias for owning time sources behind trait objects.
pub type BoxedTimeSource = Box<dyn TimeSource + Send>;

/// Time source backed by the system monotonic clock.
#[derive(Debug, Default)]
pub struct RealtimeClock {
    origin: Option<Instant>,
}

impl RealtimeClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeSource for RealtimeClock {
    fn start(&mut self) -> Result<()> {
        self.origin = Some(Instant::now());
        Ok(())
    }

    fn current_time(&self) -> f64 {
        self.origin
            .map_or(0.0, |origin| origin.elapsed().as_secs_f64())
    }

    fn is_finished(&self) -> bool {
        false
    }

    fn duration(&self) -> Option<f64> {
        None
    }
}

/// Frame-quantised clock for offline capture: frame `n` is at `n / fps`.
#[derive(Debug, Clone)]
pub struct CaptureClock {
    fps: u32,
    frame: u64,
    duration: Option<f64>,
}

impl CaptureClock {
    pub fn new(fps: u32, duration: Option<f64>) -> Result<Self> {
        if fps == 0 {
            return Err(anyhow!("capture fps must be positive"));
        }
        Ok(Self {
            fps,
            frame: 0,
            duration,
        })
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }
}

impl TimeSource for CaptureClock {
    fn start(&mut self) -> Result<()> {
        self.frame = 0;
        Ok(())
    }

    fn current_time(&self) -> f64 {
        self.frame as f64 / f64::from(self.fps)
    }

    fn is_finished(&self) -> bool {
        self.duration
            .is_some_and(|duration| self.current_time() >= duration)
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn advance_frame(&mut self) {
        self.frame = self.frame.saturating_add(1);
    }
}

#[derive(Debug, Default)]
struct Progress {
    rendered_frames: AtomicU64,
    exhausted: AtomicBool,
    /// Interleaved samples the output device has consumed.
    played_samples: Arc<AtomicU64>,
}

const SYNTH_BLOCK_FRAMES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pacing {
    /// Position is what the audio device has played.
    Device,
    /// Position follows the wall clock; nothing is heard.
    Silent,
}

/// Clock that follows a synthesizer rendering on a producer thread.
///
/// The position never runs ahead of what the producer has published.
pub struct SynthesizerClock {
    synth: Option<Box<dyn Synthesizer>>,
    sample_rate: u32,
    channels: u16,
    total_frames: u64,
    pacing: Pacing,
    progress: Arc<Progress>,
    origin: Option<Instant>,
    producer: Option<JoinHandle<Vec<f32>>>,
    output: Option<AudioOutput>,
}

impl SynthesizerClock {
    /// Plays the track on the default audio device once started.
    pub fn new(synth: Box<dyn Synthesizer>) -> Result<Self> {
        Self::with_pacing(synth, Pacing::Device)
    }

    /// Paces the track by the wall clock without opening an audio device.
    pub fn silent(synth: Box<dyn Synthesizer>) -> Result<Self> {
        Self::with_pacing(synth, Pacing::Silent)
    }

    fn with_pacing(synth: Box<dyn Synthesizer>, pacing: Pacing) -> Result<Self> {
        let sample_rate = synth.sample_rate();
        if sample_rate == 0 {
            return Err(anyhow!("synthesizer reports a zero sample rate"));
        }
        Ok(Self {
            sample_rate,
            channels: synth.channels().max(1),
            total_frames: synth.total_frames(),
            synth: Some(synth),
            pacing,
            progress: Arc::new(Progress::default()),
            origin: None,
            producer: None,
            output: None,
        })
    }

    pub fn rendered_frames(&self) -> u64 {
        self.progress.rendered_frames.load(Ordering::Acquire)
    }

    pub fn played_frames(&self) -> u64 {
        self.progress.played_samples.load(Ordering::Acquire) / u64::from(self.channels)
    }

    fn position_frames(&self) -> u64 {
        let Some(origin) = self.origin else {
            return 0;
        };
        let reached = match self.pacing {
            Pacing::Device => self.played_frames(),
            Pacing::Silent => (origin.elapsed().as_secs_f64() * f64::from(self.sample_rate)) as u64,
        };
        clamp_to_published(
            reached,
            self.rendered_frames(),
            self.total_frames,
            self.progress.exhausted.load(Ordering::Acquire),
        )
    }

    /// Waits for the producer and returns everything it rendered.
    pub fn join(&mut self) -> Option<Vec<f32>> {
        self.producer.take().and_then(|handle| handle.join().ok())
    }
}

/// Position in frames given how far playback got and what the producer
/// published. A track that ran out early still reaches its declared end.
fn clamp_to_published(reached: u64, rendered: u64, total: u64, exhausted: bool) -> u64 {
    if exhausted && reached >= rendered {
        total.max(rendered)
    } else {
        reached.min(rendered)
    }
}

impl TimeSource for SynthesizerClock {
    fn start(&mut self) -> Result<()> {
        let mut synth = self
            .synth
            .take()
            .context("synthesizer clock already started")?;
        let progress = Arc::clone(&self.progress);
        let channels = usize::from(self.channels);

        let (blocks, device_blocks) = match self.pacing {
            Pacing::Device => {
                let (sender, receiver) = mpsc::channel();
                (Some(sender), Some(receiver))
            }
            Pacing::Silent => (None, None),
        };

        let handle = thread::Builder::new()
            .name("synth-producer".into())
            .spawn(move || {
                let mut samples = Vec::new();
                let mut block = vec![0.0f32; SYNTH_BLOCK_FRAMES * channels];
                loop {
                    let frames = synth.render(&mut block);
                    if frames == 0 {
                        break;
                    }
                    let rendered = &block[..frames * channels];
                    samples.extend_from_slice(rendered);
                    progress
                        .rendered_frames
                        .fetch_add(frames as u64, Ordering::Release);
                    if let Some(blocks) = &blocks {
                        // The device side may already be gone during shutdown.
                        let _ = blocks.send(rendered.to_vec());
                    }
                }
                progress.exhausted.store(true, Ordering::Release);
                tracing::debug!(frames = samples.len() / channels, "synthesizer finished rendering");
                samples
            })
            .context("failed to spawn synthesizer thread")?;
        self.producer = Some(handle);

        if let Some(receiver) = device_blocks {
            let source = BlockSource::new(
                receiver,
                self.channels,
                self.sample_rate,
                Arc::clone(&self.progress.played_samples),
            );
            self.output = Some(AudioOutput::play(source)?);
        }
        self.origin = Some(Instant::now());
        Ok(())
    }

    fn current_time(&self) -> f64 {
        self.position_frames() as f64 / f64::from(self.sample_rate)
    }

    fn is_finished(&self) -> bool {
        self.origin.is_some() && self.position_frames() >= self.total_frames
    }

    fn duration(&self) -> Option<f64> {
        Some(self.total_frames as f64 / f64::from(self.sample_rate))
    }
}

/// Which clock drives the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ClockPolicy {
    Realtime,
    Track { path: std::path::PathBuf },
    Capture { fps: u32, duration: Option<f64> },
}

/// Builds the time source selected by configuration.
pub fn time_source_for_policy(policy: &ClockPolicy) -> Result<BoxedTimeSource> {
    match policy {
        ClockPolicy::Realtime => Ok(Box::new(RealtimeClock::new())),
        ClockPolicy::Track { path } => {
            let synth = open_track(path)?;
            Ok(Box::new(SynthesizerClock::new(Box::new(synth))?))
        }
        ClockPolicy::Capture { fps, duration } => Ok(Box::new(CaptureClock::new(*fps, *duration)?)),
    }
}

fn open_track(path: &Path) -> Result<WavSynthesizer> {
    WavSynthesizer::open(path).with_context(|| format!("failed to open audio track {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct Ramp {
        remaining: u64,
        total: u64,
    }

    impl Synthesizer for Ramp {
        fn sample_rate(&self) -> u32 {
            1000
        }

        fn channels(&self) -> u16 {
            1
        }

        fn total_frames(&self) -> u64 {
            self.total
        }

        fn render(&mut self, out: &mut [f32]) -> usize {
            let frames = (out.len() as u64).min(self.remaining) as usize;
            out[..frames].fill(0.5);
            self.remaining -= frames as u64;
            frames
        }
    }

    #[test]
    fn capture_clock_steps_by_frame_period() {
        let mut clock = CaptureClock::new(60, Some(0.05)).unwrap();
        clock.start().unwrap();
        let mut previous = clock.current_time();
        assert_eq!(previous, 0.0);

        for frame in 1..=3u64 {
            assert!(!clock.is_finished());
            clock.advance_frame();
            let now = clock.current_time();
            assert!((now - previous - 1.0 / 60.0).abs() < 1e-12);
            assert_eq!(now, frame as f64 / 60.0);
            previous = now;
        }
        // 3/60 = 0.05
        assert!(clock.is_finished());
    }

    #[test]
    fn capture_clock_without_duration_never_finishes() {
        let mut clock = CaptureClock::new(30, None).unwrap();
        clock.start().unwrap();
        for _ in 0..10_000 {
            clock.advance_frame();
        }
        assert!(!clock.is_finished());
        assert_eq!(clock.duration(), None);
    }

    #[test]
    fn zero_fps_is_rejected() {
        assert!(CaptureClock::new(0, None).is_err());
    }

    #[test]
    fn realtime_clock_is_monotonic_and_unbounded() {
        let mut clock = RealtimeClock::new();
        clock.start().unwrap();
        let first = clock.current_time();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.current_time() >= first);
        assert!(!clock.is_finished());
        assert_eq!(clock.duration(), None);
    }

    #[test]
    fn synthesizer_clock_finishes_after_track() {
        let synth = Ramp {
            remaining: 50,
            total: 50,
        };
        let mut clock = SynthesizerClock::silent(Box::new(synth)).unwrap();
        assert_eq!(clock.duration(), Some(0.05));
        assert!(!clock.is_finished());
        clock.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut last = 0.0;
        while !clock.is_finished() {
            assert!(Instant::now() < deadline, "synth clock never finished");
            let now = clock.current_time();
            assert!(now >= last);
            last = now;
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(clock.current_time() >= 0.05 - 1e-9);
        assert_eq!(clock.join().map(|samples| samples.len()), Some(50));
        assert!(clock.start().is_err());
    }

    #[test]
    fn position_never_passes_published_frames() {
        assert_eq!(clamp_to_published(900, 400, 1000, false), 400);
        assert_eq!(clamp_to_published(300, 400, 1000, false), 300);
        assert_eq!(clamp_to_published(300, 400, 1000, true), 300);
        assert_eq!(clamp_to_published(1000, 1000, 1000, true), 1000);
    }

    #[test]
    fn track_that_ends_early_still_finishes() {
        assert_eq!(clamp_to_published(400, 400, 1000, true), 1000);
    }

    #[test]
    fn silent_clock_reports_no_device_playback() {
        let synth = Ramp {
            remaining: 10,
            total: 10,
        };
        let mut clock = SynthesizerClock::silent(Box::new(synth)).unwrap();
        clock.start().unwrap();
        clock.join();
        assert_eq!(clock.played_frames(), 0);
        assert_eq!(clock.rendered_frames(), 10);
    }
}
