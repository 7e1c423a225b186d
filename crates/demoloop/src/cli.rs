use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::FrameFormat;

#[derive(Parser, Debug)]
#[command(
    name = "demoloop",
    author,
    version,
    about = "Real-time shader demo player with live reload and frame capture"
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Demo manifest (TOML).
    #[arg(long, short, value_name = "FILE", default_value = "demo.toml", env = "DEMOLOOP_CONFIG")]
    pub config: PathBuf,

    /// Render at the capture clock and write every frame to disk.
    #[arg(long)]
    pub capture: bool,

    /// Directory captured frames are written to.
    #[arg(long, value_name = "DIR")]
    pub frames_dir: Option<PathBuf>,

    /// Captured frame encoding: `raw` (RGB8, bottom-up) or `png`.
    #[arg(long, value_name = "FORMAT", value_parser = parse_frame_format)]
    pub frame_format: Option<FrameFormat>,

    /// Capture frame rate.
    #[arg(long, value_name = "FPS")]
    pub fps: Option<u32>,

    /// Seconds to capture when no soundtrack sets the length.
    #[arg(long, value_name = "SECONDS", value_parser = parse_duration)]
    pub duration: Option<f64>,

    /// Port for the live-reload endpoint.
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Do not start the live-reload endpoint.
    #[arg(long)]
    pub no_server: bool,

    /// Exit once the soundtrack or capture duration has elapsed.
    #[arg(long)]
    pub close_when_finished: bool,

    /// Override the window resolution (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Borderless fullscreen on the current monitor.
    #[arg(long)]
    pub fullscreen: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send the manifest's shader sources to a running demoloop.
    Push(PushArgs),
}

#[derive(Parser, Debug)]
pub struct PushArgs {
    /// Demo manifest (TOML).
    #[arg(long, short, value_name = "FILE", default_value = "demo.toml", env = "DEMOLOOP_CONFIG")]
    pub config: PathBuf,

    /// Host the demo is listening on.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port of the live-reload endpoint; defaults to the manifest's.
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Only push this pass.
    #[arg(long, value_name = "INDEX")]
    pub pass: Option<usize>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .trim()
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| "expected WxH format, e.g. 1920x1080".to_string())?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width '{width}'"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height '{height}'"))?;
    if width == 0 || height == 0 {
        return Err("dimensions must be greater than zero".to_string());
    }
    Ok((width, height))
}

pub fn parse_duration(value: &str) -> Result<f64, String> {
    let seconds: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration '{value}'"))?;
    if !(seconds.is_finite() && seconds > 0.0) {
        return Err(format!("duration must be a positive number of seconds, got {value}"));
    }
    Ok(seconds)
}

pub fn parse_frame_format(value: &str) -> Result<FrameFormat, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "raw" => Ok(FrameFormat::Raw),
        "png" => Ok(FrameFormat::Png),
        other => Err(format!("unknown frame format '{other}' (expected raw or png)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_size(" 640 X 360 "), Ok((640, 360)));
        assert!(parse_size("0x720").is_err());
        assert!(parse_size("1280").is_err());
        assert!(parse_size("wide x tall").is_err());
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("12.5"), Ok(12.5));
        assert!(parse_duration("0").is_err());
        assert!(parse_duration("-3").is_err());
        assert!(parse_duration("NaN").is_err());
        assert!(parse_duration("inf").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(Cli::try_parse_from(["demoloop", "--capture", "--duration", "-1"]).is_err());
    }

    #[test]
    fn parses_frame_formats() {
        assert_eq!(parse_frame_format("PNG"), Ok(FrameFormat::Png));
        assert_eq!(parse_frame_format("raw"), Ok(FrameFormat::Raw));
        assert!(parse_frame_format("exr").is_err());
    }

    #[test]
    fn push_subcommand_parses() {
        let cli = Cli::try_parse_from(["demoloop", "push", "--port", "4000", "--pass", "1"]).unwrap();
        match cli.command {
            Some(Command::Push(args)) => {
                assert_eq!(args.port, Some(4000));
                assert_eq!(args.pass, Some(1));
                assert_eq!(args.host, "127.0.0.1");
            }
            other => panic!("expected push, got {other:?}"),
        }
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "demoloop",
            "--config",
            "show/demo.toml",
            "--capture",
            "--size",
            "800x600",
            "--no-server",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        assert!(cli.run.capture);
        assert!(cli.run.no_server);
        assert_eq!(cli.run.size, Some((800, 600)));
        assert_eq!(cli.run.config, PathBuf::from("show/demo.toml"));
    }
}
