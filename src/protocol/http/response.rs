use bytes::Bytes;
use serde::Serialize;

use super::codec::HttpHead;
use super::{find_header, write_headers};
use crate::error::{Error, Result};

/// Reason phrase for the status codes this crate produces or expects.
pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub proto: String,
    pub code: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new(200)
    }
}

impl HttpResponse {
    pub fn new(code: u16) -> Self {
        Self {
            proto: "HTTP/1.1".to_string(),
            code,
            reason: status_text(code).to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Sets the status code and its standard reason phrase.
    pub fn status(&mut self, code: u16) -> &mut Self {
        self.code = code;
        self.reason = status_text(code).to_string();
        self
    }

    /// Replaces any header of the same name.
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers
            .retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn text(&mut self, code: u16, body: &str) -> &mut Self {
        self.status(code);
        self.set_header("Content-Type", "text/plain; charset=utf-8");
        self.body = Bytes::copy_from_slice(body.as_bytes());
        self
    }

    pub fn json<T: Serialize + ?Sized>(&mut self, code: u16, value: &T) -> Result<&mut Self> {
        let body =
            serde_json::to_vec(value).map_err(|e| Error::framing(format!("json encode: {}", e)))?;
        self.status(code);
        self.set_header("Content-Type", "application/json");
        self.body = Bytes::from(body);
        Ok(self)
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Wire form: status line, headers, `Content-Length`, blank line, body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(96 + self.body.len());
        out.extend_from_slice(
            format!("{} {} {}\r\n", self.proto, self.code, self.reason).as_bytes(),
        );
        write_headers(&mut out, &self.headers, self.body.len());
        out.extend_from_slice(&self.body);
        out
    }
}

impl HttpHead for HttpResponse {
    fn parse_first_line(&mut self, line: &str) -> Result<()> {
        let bad = || Error::framing(format!("bad status line {:?}", line));
        let (proto, rest) = line.split_once(' ').ok_or_else(bad)?;
        let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));

        self.proto = proto.to_string();
        self.code = code.parse().map_err(|_| bad())?;
        self.reason = reason.trim().to_string();
        Ok(())
    }

    fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Vec<(String, String)> {
        &mut self.headers
    }

    fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_bytes() {
        let mut response = HttpResponse::new(200);
        response.set_header("Connection", "close").text(200, "hey");
        assert_eq!(
            response.to_bytes(),
            b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 3\r\n\r\nhey"
                .to_vec()
        );
    }

    #[test]
    fn test_stale_content_length_is_replaced() {
        let mut response = HttpResponse::new(204);
        response.set_header("Content-Length", "999");
        let wire = String::from_utf8(response.to_bytes()).unwrap();
        assert_eq!(wire, "HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n");
    }

    #[test]
    fn test_status_line() {
        let mut response = HttpResponse::default();
        response.parse_first_line("HTTP/1.0 503 Service Unavailable").unwrap();
        assert_eq!(response.proto, "HTTP/1.0");
        assert_eq!(response.code, 503);
        assert_eq!(response.reason, "Service Unavailable");

        response.parse_first_line("HTTP/1.1 200").unwrap();
        assert_eq!(response.reason, "");
        assert!(response.parse_first_line("HTTP/1.1 abc OK").is_err());
    }

    #[test]
    fn test_json_body() {
        let mut response = HttpResponse::default();
        response
            .json(400, &serde_json::json!({ "code": 400 }))
            .unwrap();
        assert_eq!(response.reason, "Bad Request");
        assert_eq!(response.body_str(), Some(r#"{"code":400}"#));
    }
}
