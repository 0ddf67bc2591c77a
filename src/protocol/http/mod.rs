//! HTTP/1.1 subset on top of the connection rings.
//!
//! One request and one response per connection, `Connection: close` always,
//! body length taken from `Content-Length` only. The server side decodes
//! requests into work items and routes them through a [`Router`]; the client
//! side dials one slot per request and hands the parsed response to a callback.

mod client;
mod codec;
mod request;
mod response;
mod router;
mod scan;

use std::fmt;

pub use client::HttpClient;
pub use codec::{HttpClientCodec, HttpCursor, HttpHead, HttpServerCodec, HttpStage};
pub use request::HttpRequest;
pub use response::{status_text, HttpResponse};
pub use router::{RouteGroup, Router};

use crate::network::Listener;

/// Listener that answers HTTP requests through a [`Router`].
pub type HttpServer = Listener<HttpServerCodec, Router>;

impl HttpServer {
    /// Binds `addr` with an empty router; register routes through
    /// [`Listener::handler_mut`].
    pub fn http<A: std::net::ToSocketAddrs>(
        addr: A,
        config: crate::config::EngineConfig,
    ) -> crate::error::Result<Self> {
        Listener::bind(addr, config, HttpServerCodec, Router::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
    Other(String),
}

impl Method {
    pub fn parse(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Other(token) => token,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive header lookup shared by requests and responses.
pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Writes `headers` minus any `Content-Length`, then the real one.
pub(crate) fn write_headers(out: &mut Vec<u8>, headers: &[(String, String)], body_len: usize) {
    for (key, value) in headers {
        if key.eq_ignore_ascii_case("content-length") {
            continue;
        }
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body_len).as_bytes());
}
