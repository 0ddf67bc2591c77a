//! HTTP framing: the staged per-connection cursor and the two codecs.

use std::mem;

use bytes::BytesMut;
use tracing::trace;

use super::scan::take_line;
use super::{find_header, HttpRequest, HttpResponse};
use crate::core::{ByteRing, WorkItem};
use crate::error::{Error, Result};
use crate::protocol::Protocol;

/// Where a connection is in its one request/response exchange.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum HttpStage {
    #[default]
    FirstLine,
    Headers,
    Body,
    /// A full message was handed to a work item.
    ReadyToRespond,
    /// Output bytes are in the outbound ring.
    ResponseStaged,
}

/// Message types the cursor can assemble.
pub trait HttpHead: Default {
    /// Request line or status line, terminator already stripped.
    fn parse_first_line(&mut self, line: &str) -> Result<()>;
    fn headers(&self) -> &[(String, String)];
    fn headers_mut(&mut self) -> &mut Vec<(String, String)>;
    fn set_body(&mut self, body: bytes::Bytes);
}

/// Per-connection HTTP parse state.
#[derive(Debug, Default)]
pub struct HttpCursor<M> {
    stage: HttpStage,
    required: usize,
    message: M,
    line: Vec<u8>,
}

impl<M> HttpCursor<M> {
    pub fn stage(&self) -> HttpStage {
        self.stage
    }

    /// Body bytes still awaited while in [`HttpStage::Body`].
    pub fn required(&self) -> usize {
        self.required
    }
}

impl<M: HttpHead> HttpCursor<M> {
    fn decode(&mut self, inbound: &mut ByteRing, item: &mut WorkItem<M>) -> Result<bool> {
        if self.stage == HttpStage::FirstLine {
            if !take_line(inbound, &mut self.line)? {
                return Ok(false);
            }
            let line = utf8_line(&self.line)?;
            self.message = M::default();
            self.message.parse_first_line(line)?;
            self.stage = HttpStage::Headers;
            trace!(line, "http first line");
        }

        if self.stage == HttpStage::Headers {
            loop {
                if !take_line(inbound, &mut self.line)? {
                    return Ok(false);
                }

                if self.line.is_empty() {
                    match content_length(self.message.headers(), inbound.capacity())? {
                        Some(length) if length > 0 => {
                            self.required = length;
                            self.stage = HttpStage::Body;
                            trace!(length, "http body expected");
                            break;
                        }
                        _ => return Ok(self.complete(item)),
                    }
                }

                let line = utf8_line(&self.line)?;
                let (name, value) = line
                    .split_once(':')
                    .ok_or_else(|| Error::framing(format!("header line without a colon: {:?}", line)))?;
                let value = value.trim_start_matches([' ', '\t']);
                self.message
                    .headers_mut()
                    .push((name.to_string(), value.to_string()));
            }
        }

        if self.stage == HttpStage::Body {
            let required = self.required;
            if !inbound.peek_ready(|view| view.len() >= required) {
                return Ok(false);
            }
            let mut body = BytesMut::with_capacity(required);
            inbound.read_into(required, &mut body)?;
            self.message.set_body(body.freeze());
            return Ok(self.complete(item));
        }

        Ok(false)
    }

    fn complete(&mut self, item: &mut WorkItem<M>) -> bool {
        *item.message_mut() = mem::take(&mut self.message);
        self.required = 0;
        self.stage = HttpStage::ReadyToRespond;
        true
    }
}

fn utf8_line(line: &[u8]) -> Result<&str> {
    std::str::from_utf8(line).map_err(|_| Error::framing("line is not valid UTF-8"))
}

/// Parsed `Content-Length`, if present. A body the ring cannot hold is refused.
fn content_length(headers: &[(String, String)], ring_capacity: usize) -> Result<Option<usize>> {
    let Some(raw) = find_header(headers, "content-length") else {
        return Ok(None);
    };
    let length: usize = raw
        .trim()
        .parse()
        .map_err(|_| Error::framing(format!("bad Content-Length {:?}", raw)))?;
    if length > ring_capacity {
        return Err(Error::framing(format!(
            "Content-Length {} exceeds buffer capacity {}",
            length, ring_capacity
        )));
    }
    Ok(Some(length))
}

/// Copies raw bytes into `outbound`, all or nothing.
fn stage_raw(payload: &[u8], outbound: &mut ByteRing) -> Result<()> {
    if payload.len() > outbound.remaining() {
        return Err(Error::CapacityExceeded {
            needed: payload.len(),
            available: outbound.remaining(),
        });
    }
    outbound.write(payload)
}

/// Server side: requests in, raw response bytes out, close once flushed.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpServerCodec;

impl Protocol for HttpServerCodec {
    type Cursor = HttpCursor<HttpRequest>;
    type Message = HttpRequest;

    fn decode(
        &self,
        cursor: &mut Self::Cursor,
        inbound: &mut ByteRing,
        item: &mut WorkItem<HttpRequest>,
    ) -> Result<bool> {
        cursor.decode(inbound, item)
    }

    fn encode(&self, cursor: &mut Self::Cursor, payload: &[u8], outbound: &mut ByteRing) -> Result<()> {
        stage_raw(payload, outbound)?;
        cursor.stage = HttpStage::ResponseStaged;
        Ok(())
    }

    fn should_close(&self, cursor: &Self::Cursor, outbound: &ByteRing) -> bool {
        cursor.stage == HttpStage::ResponseStaged && outbound.is_empty()
    }
}

/// Client side: raw request bytes out, responses in. The connection is closed
/// by the peer or by [`super::HttpClient`] once the response was handled.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpClientCodec;

impl Protocol for HttpClientCodec {
    type Cursor = HttpCursor<HttpResponse>;
    type Message = HttpResponse;

    fn decode(
        &self,
        cursor: &mut Self::Cursor,
        inbound: &mut ByteRing,
        item: &mut WorkItem<HttpResponse>,
    ) -> Result<bool> {
        cursor.decode(inbound, item)
    }

    fn encode(&self, _cursor: &mut Self::Cursor, payload: &[u8], outbound: &mut ByteRing) -> Result<()> {
        stage_raw(payload, outbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{WorkPool, WorkTarget};
    use crate::protocol::http::Method;

    fn decode_all(
        codec: &HttpServerCodec,
        cursor: &mut HttpCursor<HttpRequest>,
        ring: &mut ByteRing,
        pool: &mut WorkPool<HttpRequest>,
    ) -> Result<Vec<usize>> {
        let mut ids = Vec::new();
        loop {
            let Some(item) = pool.next_free() else {
                return Ok(ids);
            };
            if !codec.decode(cursor, ring, item)? {
                return Ok(ids);
            }
            ids.push(pool.claim_next(WorkTarget::Connection(0))?);
        }
    }

    #[test]
    fn test_get_with_query() {
        let mut ring = ByteRing::with_capacity(256);
        let mut cursor = HttpCursor::default();
        let mut pool = WorkPool::new(2);

        ring.write(b"GET /score?id=7&name=ann HTTP/1.1\r\nHost:  example\r\n\r\n")
            .unwrap();
        let ids = decode_all(&HttpServerCodec, &mut cursor, &mut ring, &mut pool).unwrap();

        assert_eq!(ids.len(), 1);
        let request = pool.get(ids[0]).unwrap().message();
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.path, "/score");
        assert_eq!(request.param("id"), Some("7"));
        assert_eq!(request.param("name"), Some("ann"));
        assert_eq!(request.header("host"), Some("example"));
        assert!(request.body.is_empty());
        assert_eq!(cursor.stage(), HttpStage::ReadyToRespond);
    }

    #[test]
    fn test_post_body_in_pieces() {
        let mut ring = ByteRing::with_capacity(256);
        let mut cursor = HttpCursor::default();
        let mut pool = WorkPool::new(2);
        let raw = b"POST /echo HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello world";

        let mut decoded = Vec::new();
        for byte in raw.iter() {
            ring.write(&[*byte]).unwrap();
            decoded.extend(decode_all(&HttpServerCodec, &mut cursor, &mut ring, &mut pool).unwrap());
        }

        assert_eq!(decoded.len(), 1);
        let request = pool.get(decoded[0]).unwrap().message();
        assert_eq!(request.method, Method::Post);
        assert_eq!(&request.body[..], b"hello world");
        assert!(request.params.is_empty());
    }

    #[test]
    fn test_header_across_wrap_parses_identically() {
        let raw = b"POST /a HTTP/1.1\r\nX-Trace-Id: abc-123\r\nContent-Length: 2\r\n\r\nok";
        let mut expected = None;

        for offset in [0usize, 10, 25, 37, 50, 63] {
            let mut ring = ByteRing::with_capacity(64);
            ring.write(&vec![0u8; offset]).unwrap();
            ring.discard(offset).unwrap();
            ring.write(raw).unwrap();

            let mut cursor = HttpCursor::default();
            let mut pool = WorkPool::new(1);
            let ids = decode_all(&HttpServerCodec, &mut cursor, &mut ring, &mut pool).unwrap();
            let request = pool.get(ids[0]).unwrap().message().clone();

            assert_eq!(request.header("x-trace-id"), Some("abc-123"));
            match &expected {
                None => expected = Some(request),
                Some(first) => assert_eq!(&request, first, "offset {}", offset),
            }
        }
    }

    #[test]
    fn test_bad_content_length() {
        let mut ring = ByteRing::with_capacity(128);
        let mut cursor = HttpCursor::default();
        let mut pool = WorkPool::new(1);
        ring.write(b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n")
            .unwrap();

        let err = decode_all(&HttpServerCodec, &mut cursor, &mut ring, &mut pool).unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[test]
    fn test_body_larger_than_ring() {
        let mut ring = ByteRing::with_capacity(64);
        let mut cursor = HttpCursor::default();
        let mut pool = WorkPool::new(1);
        ring.write(b"POST / HTTP/1.1\r\nContent-Length: 65\r\n\r\n")
            .unwrap();

        assert!(decode_all(&HttpServerCodec, &mut cursor, &mut ring, &mut pool).is_err());
    }

    #[test]
    fn test_header_without_colon() {
        let mut ring = ByteRing::with_capacity(64);
        let mut cursor = HttpCursor::default();
        let mut pool = WorkPool::new(1);
        ring.write(b"GET / HTTP/1.1\r\nnonsense\r\n\r\n").unwrap();

        assert!(decode_all(&HttpServerCodec, &mut cursor, &mut ring, &mut pool).is_err());
    }

    #[test]
    fn test_server_closes_after_response_flushed() {
        let codec = HttpServerCodec;
        let mut cursor = HttpCursor::default();
        let mut outbound = ByteRing::with_capacity(64);
        assert!(!codec.should_close(&cursor, &outbound));

        codec
            .encode(&mut cursor, b"HTTP/1.1 200 OK\r\n\r\n", &mut outbound)
            .unwrap();
        assert!(!codec.should_close(&cursor, &outbound));

        outbound.discard(outbound.len()).unwrap();
        assert!(codec.should_close(&cursor, &outbound));
    }

    #[test]
    fn test_client_decodes_response() {
        let mut ring = ByteRing::with_capacity(128);
        let mut cursor = HttpCursor::default();
        let mut pool: WorkPool<HttpResponse> = WorkPool::new(1);
        ring.write(b"HTTP/1.1 404 Not Found\r\nContent-Length: 4\r\n\r\nnope")
            .unwrap();

        let item = pool.next_free().unwrap();
        assert!(HttpClientCodec.decode(&mut cursor, &mut ring, item).unwrap());
        let response = item.message();
        assert_eq!(response.code, 404);
        assert_eq!(response.reason, "Not Found");
        assert_eq!(&response.body[..], b"nope");
    }
}
