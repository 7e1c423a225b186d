use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use livereload::{ReloadServer, ServerConfig, ShaderTarget, Stage, StageError};
use tempfile::TempDir;

#[derive(Default)]
struct Received {
    pass_count: usize,
    stages: Vec<(usize, Stage, String)>,
}

impl ShaderTarget for Received {
    fn pass_count(&self) -> usize {
        self.pass_count
    }

    fn replace_stage(&mut self, pass: usize, stage: Stage, source: &[u8]) -> Result<(), StageError> {
        let text = String::from_utf8(source.to_vec())
            .map_err(|err| StageError::Rejected(err.to_string()))?;
        self.stages.push((pass, stage, text));
        Ok(())
    }
}

fn write_demo(dir: &Path, passes: usize) -> std::path::PathBuf {
    fs::write(dir.join("common.glsl"), "float pulse(float t) { return sin(t); }\n").unwrap();
    let mut manifest = String::from("name = \"push\"\n\n[shader]\ncommon = \"common.glsl\"\n");
    for index in 0..passes {
        let file = format!("pass{index}.frag");
        fs::write(
            dir.join(&file),
            format!("void main() {{ outColor = vec4(pulse(iTime) * {index}.0); }}\n"),
        )
        .unwrap();
        manifest.push_str(&format!("\n[[passes]]\nfragment = \"{file}\"\n"));
    }
    let path = dir.join("demo.toml");
    fs::write(&path, manifest).unwrap();
    path
}

fn push(manifest: &Path, server: Option<(&mut ReloadServer, &mut Received)>) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_demoloop"));
    command
        .arg("push")
        .arg("--config")
        .arg(manifest)
        .env("RUST_LOG", "warn")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some((server, _)) = &server {
        command.arg("--port").arg(server.local_addr().port().to_string());
    }
    let mut child = command.spawn().expect("spawn demoloop");

    if let Some((server, target)) = server {
        let deadline = Instant::now() + Duration::from_secs(20);
        while child.try_wait().expect("poll child").is_none() {
            assert!(Instant::now() < deadline, "push never finished");
            if matches!(server.poll(target), livereload::PollOutcome::Idle) {
                thread::sleep(Duration::from_millis(1));
            }
        }
    }
    child.wait_with_output().expect("collect output")
}

fn bind() -> ReloadServer {
    ReloadServer::bind(&ServerConfig {
        port: 0,
        ..ServerConfig::default()
    })
    .expect("bind loopback")
}

#[test]
fn push_sends_every_stage_of_every_pass() {
    let dir = TempDir::new().unwrap();
    let manifest = write_demo(dir.path(), 2);
    let mut server = bind();
    let mut received = Received {
        pass_count: 2,
        ..Received::default()
    };

    let output = push(&manifest, Some((&mut server, &mut received)));
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let order: Vec<(usize, Stage)> = received
        .stages
        .iter()
        .map(|(pass, stage, _)| (*pass, *stage))
        .collect();
    assert_eq!(
        order,
        vec![
            (0, Stage::Vertex),
            (0, Stage::Fragment),
            (1, Stage::Vertex),
            (1, Stage::Fragment),
        ]
    );
    let fragment = &received.stages[3].2;
    assert!(fragment.contains("float pulse(float t)"));
    assert!(fragment.contains("pulse(iTime) * 1.0"));
    assert!(received.stages[0].2.contains("gl_VertexIndex"));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("pass 1 fragment: 200 OK"), "stdout: {stdout}");
}

#[test]
fn refused_stages_fail_the_push() {
    let dir = TempDir::new().unwrap();
    let manifest = write_demo(dir.path(), 2);
    let mut server = bind();
    let mut received = Received {
        pass_count: 1,
        ..Received::default()
    };

    let output = push(&manifest, Some((&mut server, &mut received)));
    assert!(!output.status.success());
    assert_eq!(received.stages.len(), 2);
    assert!(received.stages.iter().all(|(pass, _, _)| *pass == 0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("pass 1 vertex: 404 Not Found"), "stdout: {stdout}");
}

#[test]
fn invalid_manifest_fails_before_sending() {
    let dir = TempDir::new().unwrap();
    let manifest = dir.path().join("demo.toml");
    fs::write(&manifest, "name = \"no passes\"\n").unwrap();

    let output = push(&manifest, None);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("at least one [[passes]]"), "stderr: {stderr}");
}
