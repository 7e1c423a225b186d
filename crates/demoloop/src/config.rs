use std::fs;
use std::path::{Path, PathBuf};

use renderer::{compose_pass, CaptureFormat, PassSources, SharedSource};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Demo manifest. Relative paths resolve against the manifest's directory.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DemoConfig {
    pub name: String,
    pub close_when_finished: bool,
    pub resolution: Resolution,
    pub shader: SharedShader,
    pub passes: Vec<PassConfig>,
    pub audio: AudioConfig,
    pub capture: CaptureConfig,
    pub server: ServerSection,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            name: "demo".into(),
            close_when_finished: false,
            resolution: Resolution::default(),
            shader: SharedShader::default(),
            passes: Vec::new(),
            audio: AudioConfig::default(),
            capture: CaptureConfig::default(),
            server: ServerSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    /// Render size relative to the window during live playback.
    pub scale: f32,
    pub fullscreen: bool,
    pub vsync: bool,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            scale: 1.0,
            fullscreen: false,
            vsync: true,
        }
    }
}

impl Resolution {
    pub fn render_size(&self) -> (u32, u32) {
        let scaled = |value: u32| ((value as f32 * self.scale).round() as u32).max(1);
        (scaled(self.width), scaled(self.height))
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SharedShader {
    pub prolog: Option<PathBuf>,
    pub common: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PassConfig {
    pub vertex: Option<PathBuf>,
    pub fragment: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AudioConfig {
    /// Wall-clock timing, no soundtrack.
    #[default]
    None,
    /// Timing follows a WAV soundtrack.
    Track { path: PathBuf },
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    #[default]
    Raw,
    Png,
}

impl From<FrameFormat> for CaptureFormat {
    fn from(format: FrameFormat) -> Self {
        match format {
            FrameFormat::Raw => CaptureFormat::Raw,
            FrameFormat::Png => CaptureFormat::Png,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// Seconds to capture; defaults to the soundtrack length.
    pub duration: Option<f64>,
    pub frames_dir: PathBuf,
    pub format: FrameFormat,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            width: 1920,
            height: 1080,
            duration: None,
            frames_dir: PathBuf::from("frames"),
            format: FrameFormat::Raw,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: livereload::DEFAULT_PORT,
        }
    }
}

impl DemoConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.resolve_paths(base);
        tracing::debug!(
            path = %path.display(),
            name = %config.name,
            passes = config.passes.len(),
            "loaded demo configuration"
        );
        Ok(config)
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.passes.is_empty() {
            return Err(ConfigError::Invalid(
                "demo must define at least one [[passes]] entry".into(),
            ));
        }
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(ConfigError::Invalid(
                "resolution width and height must be positive".into(),
            ));
        }
        if !(self.resolution.scale > 0.0 && self.resolution.scale <= 4.0) {
            return Err(ConfigError::Invalid(format!(
                "resolution scale {} must be within (0, 4]",
                self.resolution.scale
            )));
        }
        if self.capture.fps == 0 {
            return Err(ConfigError::Invalid("capture fps must be positive".into()));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::Invalid(
                "capture width and height must be positive".into(),
            ));
        }
        if let Some(duration) = self.capture.duration {
            if !(duration.is_finite() && duration > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "capture duration {duration} must be a positive number of seconds"
                )));
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        self.shader.prolog.iter_mut().for_each(resolve);
        self.shader.common.iter_mut().for_each(resolve);
        for pass in &mut self.passes {
            pass.vertex.iter_mut().for_each(resolve);
            resolve(&mut pass.fragment);
        }
        if let AudioConfig::Track { path } = &mut self.audio {
            resolve(path);
        }
        resolve(&mut self.capture.frames_dir);
    }

    /// Reads every shader file and assembles the complete stage sources.
    pub fn pass_sources(&self) -> Result<Vec<PassSources>, ConfigError> {
        let shared = SharedSource {
            prolog: read_optional(self.shader.prolog.as_deref())?,
            common: read_optional(self.shader.common.as_deref())?,
        };
        self.passes
            .iter()
            .map(|pass| {
                let vertex = pass.vertex.as_deref().map(read_source).transpose()?;
                let fragment = read_source(&pass.fragment)?;
                Ok(compose_pass(&shared, vertex.as_deref(), &fragment))
            })
            .collect()
    }
}

fn read_source(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn read_optional(path: Option<&Path>) -> Result<String, ConfigError> {
    path.map(read_source).transpose().map(Option::unwrap_or_default)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[passes]]
        fragment = "main.frag"
    "#;

    #[test]
    fn defaults_fill_unset_sections() {
        let config = DemoConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.capture.fps, 60);
        assert_eq!((config.capture.width, config.capture.height), (1920, 1080));
        assert_eq!(config.server.port, 3000);
        assert!(config.server.enabled);
        assert_eq!(config.audio, AudioConfig::None);
        assert!(!config.close_when_finished);
    }

    #[test]
    fn full_manifest_parses() {
        let config = DemoConfig::from_toml_str(
            r#"
            name = "nightfall"
            close_when_finished = true

            [resolution]
            width = 800
            height = 450
            scale = 0.5

            [shader]
            prolog = "prolog.glsl"
            common = "common.glsl"

            [[passes]]
            vertex = "scene.vert"
            fragment = "scene.frag"

            [[passes]]
            fragment = "post.frag"

            [audio]
            kind = "track"
            path = "music.wav"

            [capture]
            fps = 30
            duration = 12.5
            format = "png"

            [server]
            port = 4000
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "nightfall");
        assert_eq!(config.passes.len(), 2);
        assert_eq!(config.passes[1].vertex, None);
        assert_eq!(config.resolution.render_size(), (400, 225));
        assert_eq!(
            config.audio,
            AudioConfig::Track {
                path: PathBuf::from("music.wav")
            }
        );
        assert_eq!(config.capture.format, FrameFormat::Png);
        assert_eq!(config.capture.duration, Some(12.5));
        assert_eq!(config.server.port, 4000);
    }

    #[test]
    fn rejects_invalid_manifests() {
        assert!(matches!(
            DemoConfig::from_toml_str("name = \"empty\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            DemoConfig::from_toml_str(&format!("{MINIMAL}\n[capture]\nfps = 0")),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            DemoConfig::from_toml_str(&format!("{MINIMAL}\n[resolution]\nscale = 0.0")),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            DemoConfig::from_toml_str(&format!("{MINIMAL}\n[server]\nbogus = 1")),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_resolves_paths_and_composes_sources() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("common.glsl"), "float glow(float x) { return x; }").unwrap();
        fs::write(dir.path().join("main.frag"), "void main() { outColor = vec4(glow(iTime)); }")
            .unwrap();
        fs::write(
            dir.path().join("demo.toml"),
            "[shader]\ncommon = \"common.glsl\"\n\n[[passes]]\nfragment = \"main.frag\"\n",
        )
        .unwrap();

        let config = DemoConfig::load(&dir.path().join("demo.toml")).unwrap();
        assert_eq!(config.passes[0].fragment, dir.path().join("main.frag"));
        assert_eq!(config.capture.frames_dir, dir.path().join("frames"));

        let sources = config.pass_sources().unwrap();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].fragment.contains("float glow"));
        assert!(sources[0].fragment.contains("outColor = vec4(glow(iTime));"));
        assert!(sources[0].vertex.contains("gl_VertexIndex"));
    }

    #[test]
    fn bundled_demo_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/tunnel/demo.toml");
        let config = DemoConfig::load(&path).unwrap();
        let sources = config.pass_sources().unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources[1].fragment.contains("float vignette"));
        assert!(sources[1].fragment.contains("mat2 rotate"));
    }

    #[test]
    fn missing_shader_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("demo.toml"), MINIMAL).unwrap();
        let config = DemoConfig::load(&dir.path().join("demo.toml")).unwrap();
        match config.pass_sources() {
            Err(ConfigError::Read { path, .. }) => assert!(path.ends_with("main.frag")),
            other => panic!("expected read error, got {other:?}"),
        }
    }
}
