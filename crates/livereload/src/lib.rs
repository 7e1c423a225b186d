//! Live shader reload endpoint for a running render loop.
//!
//! [`ReloadServer`] is driven entirely by [`ReloadServer::poll`], which the
//! render loop calls once per frame. A request to `POST /passes/{i}/{stage}`
//! replaces that stage's source through the [`ShaderTarget`] the caller
//! passes in; everything else is answered with `404`.

mod error;
mod head;
mod http;
mod queue;
mod route;
mod server;
mod target;

pub use error::ServerError;
pub use head::{HeadError, RequestHead, Verb};
pub use http::HttpRequestQueue;
pub use queue::{BodyRead, ReceiveStatus, RequestId, RequestQueue};
pub use route::Route;
pub use server::{
    AbandonReason, PollOutcome, ReloadServer, ServerConfig, ServerState,
    DEFAULT_BODY_CHUNK_BYTES, DEFAULT_INITIAL_BUFFER_BYTES, DEFAULT_MAX_BODY_BYTES, DEFAULT_PORT,
};
pub use target::{ShaderTarget, Stage, StageError};
