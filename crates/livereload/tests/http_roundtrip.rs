use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use livereload::{PollOutcome, ReloadServer, ServerConfig, ShaderTarget, Stage, StageError};

#[derive(Default)]
struct Passes {
    sources: Vec<[Option<Vec<u8>>; 2]>,
}

impl Passes {
    fn with_count(count: usize) -> Self {
        Self {
            sources: vec![[None, None]; count],
        }
    }

    fn source(&self, pass: usize, stage: Stage) -> Option<&[u8]> {
        self.sources[pass][stage as usize].as_deref()
    }
}

impl ShaderTarget for Passes {
    fn pass_count(&self) -> usize {
        self.sources.len()
    }

    fn replace_stage(&mut self, pass: usize, stage: Stage, source: &[u8]) -> Result<(), StageError> {
        let slot = self
            .sources
            .get_mut(pass)
            .ok_or(StageError::UnknownPass(pass))?;
        slot[stage as usize] = Some(source.to_vec());
        Ok(())
    }
}

fn bind(config: ServerConfig) -> ReloadServer {
    ReloadServer::bind(&ServerConfig { port: 0, ..config }).expect("bind loopback")
}

fn send(method: &'static str, url: String, body: Vec<u8>) -> JoinHandle<u16> {
    thread::spawn(move || {
        let client = reqwest::blocking::Client::new();
        let request = match method {
            "GET" => client.get(&url),
            _ => client
                .post(&url)
                .header("Content-Type", "text/plain")
                .body(body),
        };
        request.send().expect("request").status().as_u16()
    })
}

fn serve_until_answered(
    server: &mut ReloadServer,
    target: &mut Passes,
    client: JoinHandle<u16>,
) -> (u16, Vec<PollOutcome>) {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut outcomes = Vec::new();
    while !client.is_finished() {
        assert!(Instant::now() < deadline, "client never got an answer");
        match server.poll(target) {
            PollOutcome::Idle => thread::sleep(Duration::from_millis(1)),
            outcome => outcomes.push(outcome),
        }
    }
    (client.join().expect("client thread"), outcomes)
}

#[test]
fn post_replaces_stage_over_http() {
    let mut server = bind(ServerConfig::default());
    let mut passes = Passes::with_count(2);
    let body: Vec<u8> = "float glow = 1.0;\n".repeat(600).into_bytes();
    let url = format!("http://{}/passes/1/fragment", server.local_addr());

    let client = send("POST", url, body.clone());
    let (status, _) = serve_until_answered(&mut server, &mut passes, client);

    assert_eq!(status, 200);
    assert_eq!(passes.source(1, Stage::Fragment), Some(body.as_slice()));
    assert_eq!(passes.source(0, Stage::Fragment), None);
    assert_eq!(passes.source(1, Stage::Vertex), None);
}

#[test]
fn unknown_routes_and_get_are_not_found() {
    let mut server = bind(ServerConfig::default());
    let mut passes = Passes::with_count(2);
    let addr = server.local_addr();

    let cases = [
        ("GET", format!("http://{addr}/passes/0/fragment")),
        ("POST", format!("http://{addr}/passes/5/vertex")),
        ("POST", format!("http://{addr}/passes/0/compute")),
        ("POST", format!("http://{addr}/index.html")),
    ];
    for (method, url) in cases {
        let client = send(method, url.clone(), b"void main() {}".to_vec());
        let (status, _) = serve_until_answered(&mut server, &mut passes, client);
        assert_eq!(status, 404, "{method} {url}");
    }
    assert!(passes
        .sources
        .iter()
        .all(|stages| stages.iter().all(Option::is_none)));
}

#[test]
fn small_header_buffer_grows_for_the_same_request() {
    let mut server = bind(ServerConfig {
        initial_buffer_bytes: 8,
        ..ServerConfig::default()
    });
    let mut passes = Passes::with_count(1);
    let url = format!(
        "http://{}/passes/0/vertex?revision={}",
        server.local_addr(),
        "7".repeat(200)
    );

    let client = send("POST", url, b"void main() {}".to_vec());
    let (status, outcomes) = serve_until_answered(&mut server, &mut passes, client);

    assert_eq!(status, 200);
    assert!(matches!(outcomes[0], PollOutcome::Regrown { .. }));
    assert!(server.buffer_capacity() > 200);
    assert_eq!(
        passes.source(0, Stage::Vertex),
        Some(&b"void main() {}"[..])
    );
}

/// Hands out its bytes a few at a time, so reqwest streams the body with
/// chunked transfer encoding and no `Content-Length`.
struct Trickle {
    data: Vec<u8>,
    offset: usize,
    step: usize,
}

impl std::io::Read for Trickle {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let end = (self.offset + self.step.min(buf.len())).min(self.data.len());
        let read = end - self.offset;
        buf[..read].copy_from_slice(&self.data[self.offset..end]);
        self.offset = end;
        Ok(read)
    }
}

#[test]
fn body_of_unknown_length_is_reassembled() {
    let mut server = bind(ServerConfig::default());
    let mut passes = Passes::with_count(1);
    let body: Vec<u8> = (0..9000u32).map(|i| b'a' + (i % 26) as u8).collect();
    let url = format!("http://{}/passes/0/fragment", server.local_addr());

    let streamed = body.clone();
    let client = thread::spawn(move || {
        let reader = Trickle {
            data: streamed,
            offset: 0,
            step: 700,
        };
        reqwest::blocking::Client::new()
            .post(&url)
            .header("Content-Type", "text/plain")
            .body(reqwest::blocking::Body::new(reader))
            .send()
            .expect("request")
            .status()
            .as_u16()
    });
    let (status, _) = serve_until_answered(&mut server, &mut passes, client);

    assert_eq!(status, 200);
    assert_eq!(passes.source(0, Stage::Fragment), Some(body.as_slice()));
}

#[test]
fn oversized_body_to_missing_pass_is_not_found() {
    let mut server = bind(ServerConfig {
        max_body_bytes: 1024,
        ..ServerConfig::default()
    });
    let mut passes = Passes::with_count(2);
    let url = format!("http://{}/passes/5/vertex", server.local_addr());

    let client = send("POST", url, vec![b'x'; 4096]);
    let (status, outcomes) = serve_until_answered(&mut server, &mut passes, client);

    assert_eq!(status, 404);
    assert!(matches!(
        outcomes.last(),
        Some(PollOutcome::Served { status: 404, .. })
    ));
    assert!(passes
        .sources
        .iter()
        .all(|stages| stages.iter().all(Option::is_none)));
}
