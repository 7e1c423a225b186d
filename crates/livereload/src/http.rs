//! [`RequestQueue`] backed by a `tiny_http` listener on the loopback interface.

use std::io::{self, ErrorKind, Read};
use std::net::{Ipv4Addr, SocketAddr};

use tiny_http::{Header, Request, Response, Server, StatusCode};

use crate::error::ServerError;
use crate::head::{RequestHead, Verb};
use crate::queue::{BodyRead, ReceiveStatus, RequestId, RequestQueue};

struct InFlight {
    id: RequestId,
    request: Request,
    remaining: Option<usize>,
}

pub struct HttpRequestQueue {
    server: Option<Server>,
    local_addr: SocketAddr,
    next_id: u64,
    /// Request whose header did not fit the caller's buffer.
    parked: Option<InFlight>,
    /// Request whose header was delivered and which still owes a response.
    active: Option<InFlight>,
}

impl HttpRequestQueue {
    /// Binds `127.0.0.1:port`. Port `0` picks an ephemeral port.
    pub fn bind(port: u16) -> Result<Self, ServerError> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let server = Server::http(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = server.server_addr().to_ip().unwrap_or(addr);
        tracing::debug!(%local_addr, "reload endpoint bound");

        Ok(Self {
            server: Some(server),
            local_addr,
            next_id: 1,
            parked: None,
            active: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn head_of(inflight: &InFlight) -> RequestHead {
        RequestHead {
            id: inflight.id,
            verb: Verb::from_method(&inflight.request.method().to_string()),
            path: inflight.request.url().to_string(),
            more_body: inflight.remaining != Some(0),
        }
    }

    fn deliver(&mut self, inflight: InFlight, buf: &mut [u8]) -> ReceiveStatus {
        match Self::head_of(&inflight).write_to(buf) {
            Ok(len) => {
                self.active = Some(inflight);
                ReceiveStatus::Complete(len)
            }
            Err(required) => {
                let id = inflight.id;
                self.parked = Some(inflight);
                ReceiveStatus::NeedsLargerBuffer { id, required }
            }
        }
    }

    fn take_active(&mut self, id: RequestId) -> Option<InFlight> {
        match &self.active {
            Some(inflight) if inflight.id == id => self.active.take(),
            _ => None,
        }
    }
}

impl RequestQueue for HttpRequestQueue {
    fn receive(&mut self, pending: Option<RequestId>, buf: &mut [u8]) -> ReceiveStatus {
        if let Some(stale) = self.active.take() {
            tracing::warn!(id = %stale.id, "dropping request that was never answered");
        }

        if let Some(id) = pending {
            return match self.parked.take() {
                Some(inflight) if inflight.id == id => self.deliver(inflight, buf),
                other => {
                    self.parked = other;
                    ReceiveStatus::Failed(io::Error::new(
                        ErrorKind::NotFound,
                        format!("no parked request {id}"),
                    ))
                }
            };
        }

        if let Some(stale) = self.parked.take() {
            tracing::warn!(id = %stale.id, "dropping parked request; receive re-armed without its id");
        }

        let Some(server) = self.server.as_ref() else {
            return ReceiveStatus::Failed(io::Error::new(
                ErrorKind::NotConnected,
                "reload endpoint has been shut down",
            ));
        };

        match server.try_recv() {
            Ok(Some(request)) => {
                let id = RequestId(self.next_id);
                self.next_id += 1;
                let remaining = request.body_length();
                self.deliver(
                    InFlight {
                        id,
                        request,
                        remaining,
                    },
                    buf,
                )
            }
            Ok(None) => ReceiveStatus::Pending,
            Err(err) => ReceiveStatus::Failed(err),
        }
    }

    fn read_body(&mut self, id: RequestId, chunk: &mut [u8]) -> BodyRead {
        let Some(inflight) = self.active.as_mut().filter(|inflight| inflight.id == id) else {
            return BodyRead::Failed(io::Error::new(
                ErrorKind::NotFound,
                format!("no active request {id}"),
            ));
        };

        let limit = inflight
            .remaining
            .map_or(chunk.len(), |remaining| remaining.min(chunk.len()));
        if limit == 0 {
            return BodyRead::End(0);
        }

        loop {
            match inflight.request.as_reader().read(&mut chunk[..limit]) {
                Ok(0) => {
                    return match inflight.remaining {
                        Some(remaining) if remaining > 0 => BodyRead::Failed(io::Error::new(
                            ErrorKind::UnexpectedEof,
                            format!("body ended {remaining} bytes early"),
                        )),
                        _ => BodyRead::End(0),
                    };
                }
                Ok(read) => {
                    return match inflight.remaining.as_mut() {
                        Some(remaining) => {
                            *remaining -= read;
                            if *remaining == 0 {
                                BodyRead::End(read)
                            } else {
                                BodyRead::Data(read)
                            }
                        }
                        None => BodyRead::Data(read),
                    };
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return BodyRead::Failed(err),
            }
        }
    }

    fn respond(&mut self, id: RequestId, status: u16) -> io::Result<()> {
        let inflight = self.take_active(id).ok_or_else(|| {
            io::Error::new(ErrorKind::NotFound, format!("no active request {id}"))
        })?;

        let mut response = Response::empty(StatusCode(status));
        if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"text/html"[..]) {
            response = response.with_header(header);
        }
        inflight.request.respond(response)
    }

    fn abandon(&mut self, id: RequestId) {
        // tiny_http answers a dropped request with a bare 500.
        if self.take_active(id).is_none() {
            if let Some(inflight) = self.parked.take() {
                if inflight.id != id {
                    self.parked = Some(inflight);
                }
            }
        }
    }

    fn shutdown(&mut self) {
        self.active = None;
        self.parked = None;
        if let Some(server) = self.server.take() {
            server.unblock();
            tracing::debug!(local_addr = %self.local_addr, "reload endpoint unbound");
        }
    }
}

impl Drop for HttpRequestQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
