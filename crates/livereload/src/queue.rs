//! Request-queue abstraction consumed by [`ReloadServer`](crate::ReloadServer).
//!
//! The queue hands out one request at a time. The caller supplies the buffer
//! the request header is copied into; when that buffer is too small the queue
//! keeps the request parked under its [`RequestId`] and reports how many bytes
//! it needs, so the caller can grow the buffer and ask again for the same id.

use std::fmt;
use std::io;

/// Opaque identifier the queue assigns to each incoming request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of a non-blocking receive.
#[derive(Debug)]
pub enum ReceiveStatus {
    /// Nothing ready yet.
    Pending,
    /// The encoded header occupies the first `len` bytes of the buffer.
    Complete(usize),
    /// The header did not fit. The request stays parked under `id` until a
    /// receive for that id is issued with a buffer of at least `required` bytes.
    NeedsLargerBuffer { id: RequestId, required: usize },
    Failed(io::Error),
}

/// Result of reading one body chunk.
#[derive(Debug)]
pub enum BodyRead {
    /// `n` bytes were written into the chunk and more may follow.
    Data(usize),
    /// `n` bytes were written into the chunk and the body is exhausted.
    End(usize),
    Failed(io::Error),
}

pub trait RequestQueue {
    /// Polls for the next request without blocking.
    ///
    /// `pending` selects a request previously reported through
    /// [`ReceiveStatus::NeedsLargerBuffer`]; `None` asks for a new one.
    fn receive(&mut self, pending: Option<RequestId>, buf: &mut [u8]) -> ReceiveStatus;

    /// Reads the next body chunk of `id`. May block until data or end-of-body.
    fn read_body(&mut self, id: RequestId, chunk: &mut [u8]) -> BodyRead;

    /// Sends an empty response carrying `status` and retires `id`.
    fn respond(&mut self, id: RequestId, status: u16) -> io::Result<()>;

    /// Drops `id` without writing a response.
    fn abandon(&mut self, id: RequestId);

    /// Stops accepting connections.
    fn shutdown(&mut self);
}
