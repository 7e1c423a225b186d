use std::collections::TryReserveError;
use std::net::SocketAddr;

use crate::error::ServerError;
use crate::head::{RequestHead, Verb};
use crate::http::HttpRequestQueue;
use crate::queue::{BodyRead, ReceiveStatus, RequestId, RequestQueue};
use crate::route::Route;
use crate::target::{ShaderTarget, StageError};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_INITIAL_BUFFER_BYTES: usize = 2048;
pub const DEFAULT_BODY_CHUNK_BYTES: usize = 2048;
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

const STATUS_OK: u16 = 200;
const STATUS_NOT_FOUND: u16 = 404;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub initial_buffer_bytes: usize,
    pub body_chunk_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            initial_buffer_bytes: DEFAULT_INITIAL_BUFFER_BYTES,
            body_chunk_bytes: DEFAULT_BODY_CHUNK_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<(), ServerError> {
        if self.initial_buffer_bytes == 0 {
            return Err(ServerError::Invalid(
                "initial buffer size must be non-zero".into(),
            ));
        }
        if self.body_chunk_bytes == 0 {
            return Err(ServerError::Invalid("body chunk size must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    AwaitingHeader,
    AwaitingBody,
    Dispatching,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbandonReason {
    Transport,
    Resource,
    MalformedHeader,
}

/// What a single [`ReloadServer::poll`] call accomplished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    /// The header did not fit; the buffer now holds `capacity` bytes and the
    /// next poll receives `id` again.
    Regrown { id: RequestId, capacity: usize },
    Served {
        id: RequestId,
        status: u16,
        route: Option<Route>,
    },
    Abandoned {
        id: Option<RequestId>,
        reason: AbandonReason,
    },
}

/// Receive state for the one request in flight.
struct ConnectionContext {
    buffer: Vec<u8>,
    pending: Option<RequestId>,
}

impl ConnectionContext {
    fn new(initial: usize) -> Self {
        Self {
            buffer: vec![0; initial],
            pending: None,
        }
    }

    fn grow_to(&mut self, required: usize) -> Result<(), TryReserveError> {
        if required > self.buffer.len() {
            self.buffer.try_reserve_exact(required - self.buffer.len())?;
            self.buffer.resize(required, 0);
        }
        Ok(())
    }
}

/// Body bytes gathered for one request. A failed append leaves the bytes
/// gathered so far untouched.
#[derive(Debug, Default)]
struct AccumulatedBody {
    bytes: Vec<u8>,
}

impl AccumulatedBody {
    fn append(&mut self, chunk: &[u8]) -> Result<(), TryReserveError> {
        self.bytes.try_reserve(chunk.len())?;
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }
}

enum BodyFailure {
    Transport,
    Resource,
}

/// Polled live-reload endpoint.
///
/// All progress happens inside [`poll`](Self::poll); the server never spawns
/// threads of its own. One request is serviced at a time and later requests
/// wait in the queue until subsequent polls.
pub struct ReloadServer<Q: RequestQueue = HttpRequestQueue> {
    queue: Q,
    context: ConnectionContext,
    chunk: Vec<u8>,
    max_body_bytes: usize,
    state: ServerState,
    running: bool,
}

impl ReloadServer<HttpRequestQueue> {
    pub fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let queue = HttpRequestQueue::bind(config.port)?;
        let server = Self::with_queue(queue, config)?;
        tracing::info!(addr = %server.local_addr(), "reload server listening");
        Ok(server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.queue.local_addr()
    }
}

impl<Q: RequestQueue> ReloadServer<Q> {
    pub fn with_queue(queue: Q, config: &ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        Ok(Self {
            queue,
            context: ConnectionContext::new(config.initial_buffer_bytes),
            chunk: vec![0; config.body_chunk_bytes],
            max_body_bytes: config.max_body_bytes,
            state: ServerState::Idle,
            running: true,
        })
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn buffer_capacity(&self) -> usize {
        self.context.buffer.len()
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Advances the protocol by at most one completed request.
    ///
    /// Returns immediately when nothing is queued. Once a request header has
    /// arrived, its body is read to the end before returning.
    pub fn poll<T: ShaderTarget + ?Sized>(&mut self, target: &mut T) -> PollOutcome {
        if !self.running {
            return PollOutcome::Idle;
        }
        if self.state == ServerState::Idle {
            self.state = ServerState::AwaitingHeader;
        }

        let pending = self.context.pending;
        let len = match self.queue.receive(pending, &mut self.context.buffer) {
            ReceiveStatus::Pending => return PollOutcome::Idle,
            ReceiveStatus::NeedsLargerBuffer { id, required } => {
                return self.regrow(id, required);
            }
            ReceiveStatus::Failed(err) => {
                tracing::warn!(error = %err, ?pending, "reload request receive failed");
                if let Some(id) = pending {
                    self.queue.abandon(id);
                }
                return self.rearm(PollOutcome::Abandoned {
                    id: pending,
                    reason: AbandonReason::Transport,
                });
            }
            ReceiveStatus::Complete(len) => len,
        };

        let head = match RequestHead::parse(&self.context.buffer[..len]) {
            Ok(head) => head,
            Err(err) => {
                tracing::warn!(error = %err, "discarding undecodable request header");
                if let Some(id) = pending {
                    self.queue.abandon(id);
                }
                return self.rearm(PollOutcome::Abandoned {
                    id: pending,
                    reason: AbandonReason::MalformedHeader,
                });
            }
        };
        tracing::debug!(id = %head.id, verb = %head.verb, path = %head.path, "reload request");

        // Only requests that will reach the target have their body read.
        let route = match resolve(&head, target) {
            Ok(route) => route,
            Err(route) => {
                self.state = ServerState::Dispatching;
                return self.answer(head.id, STATUS_NOT_FOUND, route);
            }
        };

        let body = if head.more_body {
            self.state = ServerState::AwaitingBody;
            match self.read_body(head.id) {
                Ok(body) => body,
                Err(failure) => {
                    self.queue.abandon(head.id);
                    let reason = match failure {
                        BodyFailure::Transport => AbandonReason::Transport,
                        BodyFailure::Resource => AbandonReason::Resource,
                    };
                    return self.rearm(PollOutcome::Abandoned {
                        id: Some(head.id),
                        reason,
                    });
                }
            }
        } else {
            AccumulatedBody::default()
        };

        self.state = ServerState::Dispatching;
        let status = dispatch(route, &body.bytes, target);
        self.answer(head.id, status, Some(route))
    }

    /// Unbinds the endpoint. Later polls do nothing.
    pub fn shutdown(&mut self) {
        if self.running {
            self.running = false;
            self.queue.shutdown();
            self.state = ServerState::Idle;
            tracing::info!("reload server stopped");
        }
    }

    fn regrow(&mut self, id: RequestId, required: usize) -> PollOutcome {
        match self.context.grow_to(required) {
            Ok(()) => {
                tracing::debug!(%id, required, "growing request buffer");
                self.context.pending = Some(id);
                PollOutcome::Regrown {
                    id,
                    capacity: self.context.buffer.len(),
                }
            }
            Err(err) => {
                tracing::error!(%id, required, error = %err, "cannot grow request buffer");
                self.queue.abandon(id);
                self.rearm(PollOutcome::Abandoned {
                    id: Some(id),
                    reason: AbandonReason::Resource,
                })
            }
        }
    }

    fn read_body(&mut self, id: RequestId) -> Result<AccumulatedBody, BodyFailure> {
        let mut body = AccumulatedBody::default();
        loop {
            let (read, done) = match self.queue.read_body(id, &mut self.chunk) {
                BodyRead::Data(read) => (read, false),
                BodyRead::End(read) => (read, true),
                BodyRead::Failed(err) => {
                    tracing::warn!(%id, error = %err, "reload body read failed");
                    return Err(BodyFailure::Transport);
                }
            };

            if body.len() + read > self.max_body_bytes {
                tracing::warn!(%id, limit = self.max_body_bytes, "reload body exceeds size limit");
                return Err(BodyFailure::Resource);
            }
            if let Err(err) = body.append(&self.chunk[..read]) {
                tracing::error!(%id, error = %err, "cannot grow reload body buffer");
                return Err(BodyFailure::Resource);
            }
            if done {
                return Ok(body);
            }
        }
    }

    fn answer(&mut self, id: RequestId, status: u16, route: Option<Route>) -> PollOutcome {
        if let Err(err) = self.queue.respond(id, status) {
            tracing::warn!(%id, status, error = %err, "failed to send reload response");
        }
        self.rearm(PollOutcome::Served { id, status, route })
    }

    fn rearm(&mut self, outcome: PollOutcome) -> PollOutcome {
        self.context.pending = None;
        self.state = ServerState::AwaitingHeader;
        outcome
    }
}

/// The route of a request the target can accept, or what little routing
/// information a request that gets 404 carried.
fn resolve<T: ShaderTarget + ?Sized>(
    head: &RequestHead,
    target: &T,
) -> Result<Route, Option<Route>> {
    let Some(route) = Route::parse(&head.path) else {
        return Err(None);
    };
    if head.verb != Verb::Post || route.pass >= target.pass_count() {
        return Err(Some(route));
    }
    Ok(route)
}

fn dispatch<T: ShaderTarget + ?Sized>(route: Route, body: &[u8], target: &mut T) -> u16 {
    tracing::trace!(
        pass = route.pass,
        stage = %route.stage,
        source = %String::from_utf8_lossy(body),
        "replacement source"
    );
    match target.replace_stage(route.pass, route.stage, body) {
        Ok(()) => {
            tracing::info!(pass = route.pass, stage = %route.stage, bytes = body.len(), "shader stage reloaded");
        }
        Err(StageError::UnknownPass(pass)) => {
            tracing::warn!(pass, "pass disappeared before reload");
            return STATUS_NOT_FOUND;
        }
        Err(StageError::Rejected(diagnostics)) => {
            tracing::warn!(
                pass = route.pass,
                stage = %route.stage,
                "reload rejected, keeping previous program:\n{diagnostics}"
            );
        }
    }
    STATUS_OK
}
