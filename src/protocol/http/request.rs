use std::collections::HashMap;

use bytes::Bytes;
use serde::Serialize;

use super::codec::HttpHead;
use super::{find_header, write_headers, Method};
use crate::error::{Error, Result};

/// A decoded request, or one being built for [`super::HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    /// Target without the query string.
    pub path: String,
    /// Raw query string, without the `?`.
    pub query: String,
    pub proto: String,
    /// `key=value` pairs of the query string (GET only).
    pub params: HashMap<String, String>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self {
            method: Method::Get,
            path: String::new(),
            query: String::new(),
            proto: "HTTP/1.1".to_string(),
            params: HashMap::new(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }
}

impl HttpRequest {
    pub fn new(method: Method, target: &str) -> Self {
        let mut request = Self {
            method,
            ..Self::default()
        };
        request.set_target(target);
        request
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::Get, target)
    }

    pub fn post(target: &str, body: impl Into<Bytes>) -> Self {
        let mut request = Self::new(Method::Post, target);
        request.body = body.into();
        request
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Replaces the body with `value` as JSON.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let body =
            serde_json::to_vec(value).map_err(|e| Error::framing(format!("json encode: {}", e)))?;
        self.body = Bytes::from(body);
        self.headers
            .retain(|(key, _)| !key.eq_ignore_ascii_case("content-type"));
        self.headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        Ok(self)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Wire form, with `Content-Length` always present.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.path.len() + self.body.len());
        out.extend_from_slice(self.method.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.path.as_bytes());
        if !self.query.is_empty() {
            out.push(b'?');
            out.extend_from_slice(self.query.as_bytes());
        }
        out.push(b' ');
        out.extend_from_slice(self.proto.as_bytes());
        out.extend_from_slice(b"\r\n");
        write_headers(&mut out, &self.headers, self.body.len());
        out.extend_from_slice(&self.body);
        out
    }

    fn set_target(&mut self, target: &str) {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        self.path = path.to_string();
        self.query = query.to_string();

        self.params.clear();
        if self.method == Method::Get {
            parse_params(query, &mut self.params);
        }
    }
}

/// Splits `a=1&b=2`. Empty pieces, pieces without `=` and pieces holding a
/// `;` are skipped.
fn parse_params(query: &str, params: &mut HashMap<String, String>) {
    for pair in query.split('&') {
        if pair.is_empty() || pair.contains(';') {
            continue;
        }
        if let Some((key, value)) = pair.split_once('=') {
            params.insert(key.to_string(), value.to_string());
        }
    }
}

impl HttpHead for HttpRequest {
    fn parse_first_line(&mut self, line: &str) -> Result<()> {
        let bad = || Error::framing(format!("bad request line {:?}", line));
        let (method, rest) = line.split_once(' ').ok_or_else(bad)?;
        let (target, proto) = rest.split_once(' ').ok_or_else(bad)?;
        if method.is_empty() || target.is_empty() {
            return Err(bad());
        }

        self.method = Method::parse(method);
        self.proto = proto.trim().to_string();
        self.set_target(target);
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
    fn test_first_line() {
        let mut request = HttpRequest::default();
        request
            .parse_first_line("GET /rank?top=10&&bad;x=1&flag HTTP/1.1")
            .unwrap();

        assert_eq!(request.method, Method::Get);
        assert_eq!(request.path, "/rank");
        assert_eq!(request.query, "top=10&&bad;x=1&flag");
        assert_eq!(request.proto, "HTTP/1.1");
        assert_eq!(request.params.len(), 1);
        assert_eq!(request.param("top"), Some("10"));
    }

    #[test]
    fn test_post_keeps_query_unparsed() {
        let mut request = HttpRequest::default();
        request.parse_first_line("POST /submit?a=1 HTTP/1.1").unwrap();
        assert_eq!(request.query, "a=1");
        assert!(request.params.is_empty());
    }

    #[test]
    fn test_malformed_first_line() {
        let mut request = HttpRequest::default();
        assert!(request.parse_first_line("GET").is_err());
        assert!(request.parse_first_line("GET /only").is_err());
    }

    #[test]
    fn test_to_bytes() {
        let request = HttpRequest::post("/echo?v=2", &b"hi"[..]).with_header("Host", "local");
        assert_eq!(
            request.to_bytes(),
            b"POST /echo?v=2 HTTP/1.1\r\nHost: local\r\nContent-Length: 2\r\n\r\nhi".to_vec()
        );
    }

    #[test]
    fn test_json_body() {
        let request = HttpRequest::post("/a", Bytes::new())
            .json(&serde_json::json!({ "n": 1 }))
            .unwrap();
        assert_eq!(&request.body[..], br#"{"n":1}"#);
        assert_eq!(request.header("content-type"), Some("application/json"));
    }
}
