use std::path::PathBuf;

use anyhow::{Context, Result};
use livereload::{ReloadServer, ServerConfig};
use renderer::{
    fallback_pass, time_source_for_policy, ClockPolicy, DiscardSink, FrameSink, LoopExit,
    ProgramTable, RenderLoop, SequenceWriter, Synthesizer, WavSynthesizer, WindowConfig,
    WindowTarget,
};
use tracing_subscriber::EnvFilter;

use crate::cli::RunArgs;
use crate::config::{AudioConfig, DemoConfig, FrameFormat};

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn run(args: RunArgs) -> Result<()> {
    let config = DemoConfig::load(&args.config)
        .with_context(|| format!("failed to load demo manifest {}", args.config.display()))?;
    let session = Session::plan(&config, &args)?;
    tracing::info!(
        name = %config.name,
        passes = config.passes.len(),
        clock = ?session.clock,
        server = ?session.server_port,
        "starting demo"
    );

    let sources = config.pass_sources()?;
    let clock = time_source_for_policy(&session.clock)?;
    let sink: Box<dyn FrameSink> = match &session.capture {
        Some((dir, format)) => {
            let writer = SequenceWriter::new(dir.clone(), (*format).into())
                .context("failed to prepare capture directory")?;
            tracing::info!(dir = %writer.dir().display(), ?format, "capturing frames");
            Box::new(writer)
        }
        None => Box::new(DiscardSink),
    };

    // Bind before the window opens so a taken port fails fast.
    let server = match session.server_port {
        Some(port) => {
            let server = ReloadServer::bind(&ServerConfig {
                port,
                ..ServerConfig::default()
            })?;
            tracing::info!(addr = %server.local_addr(), "live reload listening");
            Some(server)
        }
        None => None,
    };

    let (mut target, backend) = WindowTarget::open(&session.window, sources.len())?;
    let mut programs = ProgramTable::build(backend, sources, &fallback_pass())?;

    let mut render_loop = RenderLoop::new(clock, sink, server, session.close_when_finished);
    let exit = render_loop.run(&mut target, &mut programs)?;
    match exit {
        LoopExit::Finished => tracing::info!(
            frames = render_loop.frames_rendered(),
            "demo finished"
        ),
        LoopExit::Cancelled => tracing::info!(
            frames = render_loop.frames_rendered(),
            "demo closed"
        ),
    }
    Ok(())
}

/// Everything the run needs, resolved from the manifest and command line.
#[derive(Debug, Clone, PartialEq)]
struct Session {
    clock: ClockPolicy,
    capture: Option<(PathBuf, FrameFormat)>,
    server_port: Option<u16>,
    close_when_finished: bool,
    window: WindowConfig,
}

impl Session {
    fn plan(config: &DemoConfig, args: &RunArgs) -> Result<Self> {
        let track = match &config.audio {
            AudioConfig::Track { path } => Some(path),
            AudioConfig::None => None,
        };

        let server_port = (config.server.enabled && !args.no_server)
            .then(|| args.port.unwrap_or(config.server.port));

        if args.capture {
            let fps = args.fps.unwrap_or(config.capture.fps);
            let mut duration = args.duration.or(config.capture.duration);
            if duration.is_none() {
                if let Some(path) = track {
                    duration = Some(track_length(path)?);
                }
            }
            if duration.is_none() {
                tracing::warn!("capture has no duration or soundtrack; it runs until the window closes");
            }
            let size = args
                .size
                .unwrap_or((config.capture.width, config.capture.height));
            let frames_dir = args
                .frames_dir
                .clone()
                .unwrap_or_else(|| config.capture.frames_dir.clone());
            let format = args.frame_format.unwrap_or(config.capture.format);
            return Ok(Self {
                clock: ClockPolicy::Capture { fps, duration },
                capture: Some((frames_dir, format)),
                server_port,
                close_when_finished: true,
                window: WindowConfig {
                    title: format!("{} (capture)", config.name),
                    window_size: size,
                    render_size: size,
                    fullscreen: false,
                    vsync: false,
                },
            });
        }

        let clock = match track {
            Some(path) => ClockPolicy::Track { path: path.clone() },
            None => ClockPolicy::Realtime,
        };
        let mut resolution = config.resolution.clone();
        if let Some((width, height)) = args.size {
            resolution.width = width;
            resolution.height = height;
        }
        Ok(Self {
            clock,
            capture: None,
            server_port,
            close_when_finished: config.close_when_finished || args.close_when_finished,
            window: WindowConfig {
                title: config.name.clone(),
                window_size: (resolution.width, resolution.height),
                render_size: resolution.render_size(),
                fullscreen: resolution.fullscreen || args.fullscreen,
                vsync: resolution.vsync,
            },
        })
    }
}

fn track_length(path: &std::path::Path) -> Result<f64> {
    let track = WavSynthesizer::open(path)
        .with_context(|| format!("failed to open audio track {}", path.display()))?;
    Ok(track.total_frames() as f64 / f64::from(track.sample_rate()))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::Cli;

    fn args(extra: &[&str]) -> RunArgs {
        let argv = std::iter::once("demoloop").chain(extra.iter().copied());
        Cli::try_parse_from(argv).unwrap().run
    }

    fn manifest(extra: &str) -> DemoConfig {
        DemoConfig::from_toml_str(&format!(
            "name = \"tunnel\"\n{extra}\n[[passes]]\nfragment = \"main.frag\"\n"
        ))
        .unwrap()
    }

    #[test]
    fn live_session_uses_wall_clock_and_server() {
        let session = Session::plan(&manifest(""), &args(&[])).unwrap();
        assert_eq!(session.clock, ClockPolicy::Realtime);
        assert_eq!(session.capture, None);
        assert_eq!(session.server_port, Some(3000));
        assert!(!session.close_when_finished);
        assert_eq!(session.window.window_size, (1280, 720));
        assert!(session.window.vsync);
    }

    #[test]
    fn command_line_overrides_manifest() {
        let session = Session::plan(
            &manifest("[resolution]\nscale = 0.5"),
            &args(&["--port", "4100", "--size", "640x480", "--close-when-finished"]),
        )
        .unwrap();
        assert_eq!(session.server_port, Some(4100));
        assert_eq!(session.window.window_size, (640, 480));
        assert_eq!(session.window.render_size, (320, 240));
        assert!(session.close_when_finished);

        let quiet = Session::plan(&manifest(""), &args(&["--no-server"])).unwrap();
        assert_eq!(quiet.server_port, None);
    }

    #[test]
    fn capture_session_renders_at_capture_size() {
        let config = manifest("[capture]\nfps = 24\nwidth = 320\nheight = 200\nduration = 2.0");
        let session = Session::plan(&config, &args(&["--capture", "--frame-format", "png"])).unwrap();
        assert_eq!(
            session.clock,
            ClockPolicy::Capture {
                fps: 24,
                duration: Some(2.0)
            }
        );
        assert_eq!(session.capture, Some((PathBuf::from("frames"), FrameFormat::Png)));
        assert!(session.close_when_finished);
        assert_eq!(session.window.render_size, (320, 200));
        assert!(!session.window.vsync);
    }

    #[test]
    fn capture_duration_defaults_to_track_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("music.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..(8000 * 3 / 2) {
            writer.write_sample(0i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let config = manifest(&format!(
            "[audio]\nkind = \"track\"\npath = {:?}\n",
            path.display().to_string()
        ));
        let live = Session::plan(&config, &args(&[])).unwrap();
        assert_eq!(live.clock, ClockPolicy::Track { path: path.clone() });

        let capture = Session::plan(&config, &args(&["--capture", "--fps", "10"])).unwrap();
        assert_eq!(
            capture.clock,
            ClockPolicy::Capture {
                fps: 10,
                duration: Some(1.5)
            }
        );
    }
}
