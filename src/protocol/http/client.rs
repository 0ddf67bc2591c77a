//! One-shot HTTP requests over a dialer.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{debug, warn};

use super::{HttpClientCodec, HttpRequest, HttpResponse};
use crate::config::EngineConfig;
use crate::core::{WorkHandler, WorkItem};
use crate::error::Result;
use crate::network::{ConnectionMode, DialOptions, Dialer, LinkState, TickStats};

type ResponseCallback = Box<dyn FnOnce(&HttpResponse)>;

/// Work handler of the client dialer: hands each response to its callback.
#[derive(Default)]
pub(crate) struct ResponseCallbacks {
    pending: HashMap<usize, ResponseCallback>,
    answered: Vec<usize>,
}

impl WorkHandler<HttpResponse> for ResponseCallbacks {
    fn handle(&mut self, item: &mut WorkItem<HttpResponse>) {
        let Some(conn) = item.connection_id() else {
            item.finish();
            return;
        };

        match self.pending.remove(&conn) {
            Some(callback) => {
                debug!(conn, code = item.message().code, "http response received");
                callback(item.message());
                self.answered.push(conn);
            }
            None => warn!(conn, "http response without a pending request"),
        }
        item.finish();
    }
}

/// Sends each request on its own close-mode connection.
pub struct HttpClient {
    dialer: Dialer<HttpClientCodec, ResponseCallbacks>,
    // Reused between ticks
    lost: Vec<usize>,
}

impl HttpClient {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Ok(Self {
            dialer: Dialer::new(config, HttpClientCodec, ResponseCallbacks::default())?,
            lost: Vec::new(),
        })
    }

    /// Dials `addr`, queues `request` and returns the connection id. `callback`
    /// runs at most once, from [`HttpClient::run_once`].
    pub fn send<F>(&mut self, addr: SocketAddr, request: &HttpRequest, callback: F) -> Result<usize>
    where
        F: FnOnce(&HttpResponse) + 'static,
    {
        let conn = self
            .dialer
            .dial(addr, ConnectionMode::Close, DialOptions::new())?;
        self.dialer.write(conn, &request.to_bytes())?;
        self.dialer
            .handler_mut()
            .pending
            .insert(conn, Box::new(callback));
        debug!(conn, method = %request.method, path = %request.path, "http request queued");
        Ok(conn)
    }

    /// Requests still waiting for their response.
    pub fn pending(&self) -> usize {
        self.dialer.handler().pending.len()
    }

    pub fn run_once(&mut self) -> TickStats {
        let stats = self.dialer.run_once();

        let answered = std::mem::take(&mut self.dialer.handler_mut().answered);
        for conn in answered {
            // Already gone if the server closed first
            let _ = self.dialer.disconnect(conn);
        }

        self.lost.clear();
        let dialer = &self.dialer;
        self.lost.extend(
            dialer
                .handler()
                .pending
                .keys()
                .copied()
                .filter(|&conn| dialer.link_state(conn) == Some(LinkState::Unused)),
        );
        for conn in self.lost.drain(..) {
            warn!(conn, "connection ended without a response");
            self.dialer.handler_mut().pending.remove(&conn);
        }

        stats
    }
}
