//! HTTP listener and client on loopback
//!
//! Usage:
//!   cargo test --test http_roundtrip

use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tickwire::protocol::http::{HttpClient, HttpRequest, HttpResponse, HttpServer};
use tickwire::EngineConfig;

fn config() -> EngineConfig {
    EngineConfig::default()
        .with_max_connections(4)
        .with_max_works(16)
        .with_read_buffers(512, 8)
        .with_disconnect_grace(Duration::from_millis(100))
}

fn server() -> HttpServer {
    let mut server = HttpServer::http("127.0.0.1:0", config()).unwrap();
    server
        .handler_mut()
        .get("/greet", |req, res| {
            let name = req.param("name").unwrap_or("stranger");
            res.text(200, &format!("hello {}", name));
        })
        .post("/sum", |req, res| {
            let numbers: Vec<i64> = serde_json::from_slice(&req.body).unwrap_or_default();
            let total: i64 = numbers.iter().sum();
            if res.json(200, &json!({ "sum": total })).is_err() {
                res.status(500);
            }
        })
        .get("/boom", |_, _| panic!("route failure"));
    server
}

/// Sends raw request bytes and reads until the server closes.
fn raw_exchange(server: &mut HttpServer, request: &[u8]) -> String {
    let mut client = TcpStream::connect(server.local_addr()).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(request).unwrap();

    let reader = thread::spawn(move || {
        let mut out = Vec::new();
        client.read_to_end(&mut out).map(|_| out)
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while !reader.is_finished() {
        assert!(Instant::now() < deadline, "no response in time");
        server.run_once();
        thread::sleep(Duration::from_millis(1));
    }
    String::from_utf8(reader.join().unwrap().unwrap()).unwrap()
}

fn body_of(wire: &str) -> &str {
    wire.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or("")
}

#[test]
fn test_get_with_query() {
    let mut server = server();
    let wire = raw_exchange(&mut server, b"GET /greet?name=ada HTTP/1.1\r\nHost: x\r\n\r\n");

    assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"), "{}", wire);
    assert!(wire.contains("Connection: close\r\n"));
    assert!(wire.contains("Content-Length: 9\r\n"));
    assert_eq!(body_of(&wire), "hello ada");
}

#[test]
fn test_post_json_body() {
    let mut server = server();
    let body = b"[1, 2, 39]";
    let mut request = format!(
        "POST /sum HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(body);

    let wire = raw_exchange(&mut server, &request);
    assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"), "{}", wire);
    let parsed: Value = serde_json::from_str(body_of(&wire)).unwrap();
    assert_eq!(parsed["sum"], 42);
}

#[test]
fn test_unknown_route_answers_400() {
    let mut server = server();

    let wire = raw_exchange(&mut server, b"GET /missing HTTP/1.1\r\n\r\n");
    assert!(wire.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{}", wire);
    let parsed: Value = serde_json::from_str(body_of(&wire)).unwrap();
    assert_eq!(parsed["msg"], "Unregistered http query.");

    let wire = raw_exchange(&mut server, b"DELETE /greet HTTP/1.1\r\n\r\n");
    let parsed: Value = serde_json::from_str(body_of(&wire)).unwrap();
    assert_eq!(parsed["msg"], "Unregistered http method.");
}

#[test]
fn test_panicking_route_answers_500_and_server_survives() {
    let mut server = server();

    let wire = raw_exchange(&mut server, b"GET /boom HTTP/1.1\r\n\r\n");
    assert!(wire.starts_with("HTTP/1.1 500 Internal Server Error\r\n"), "{}", wire);

    let wire = raw_exchange(&mut server, b"GET /greet HTTP/1.1\r\n\r\n");
    assert_eq!(body_of(&wire), "hello stranger");
}

#[test]
fn test_server_releases_connection_after_response() {
    let mut server = server();
    raw_exchange(&mut server, b"GET /greet HTTP/1.1\r\n\r\n");

    let deadline = Instant::now() + Duration::from_secs(5);
    while !server.connections().is_empty() {
        assert!(Instant::now() < deadline, "slot not released");
        server.run_once();
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_client_against_server() {
    let mut server = server();
    let addr = server.local_addr();
    let mut client = HttpClient::new(config()).unwrap();

    let responses: Rc<RefCell<Vec<HttpResponse>>> = Rc::default();

    let sink = Rc::clone(&responses);
    client
        .send(addr, &HttpRequest::get("/greet?name=bo"), move |res| {
            sink.borrow_mut().push(res.clone())
        })
        .unwrap();

    let sink = Rc::clone(&responses);
    let request = HttpRequest::post("/sum", "").json(&[5, 6]).unwrap();
    client
        .send(addr, &request, move |res| sink.borrow_mut().push(res.clone()))
        .unwrap();
    assert_eq!(client.pending(), 2);

    let deadline = Instant::now() + Duration::from_secs(5);
    while client.pending() > 0 {
        assert!(Instant::now() < deadline, "responses not received");
        server.run_once();
        client.run_once();
        thread::sleep(Duration::from_millis(1));
    }

    let mut got = responses.borrow().clone();
    got.sort_by_key(|res| res.body.len());
    assert_eq!(got.len(), 2);
    assert!(got.iter().all(|res| res.code == 200));

    let bodies: Vec<&str> = got.iter().filter_map(HttpResponse::body_str).collect();
    assert!(bodies.contains(&"hello bo"), "{:?}", bodies);
    assert!(bodies.contains(&r#"{"sum":11}"#), "{:?}", bodies);
}
