//! Exact-match router used as the work handler of an HTTP listener.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error, warn};

use super::{HttpRequest, HttpResponse, Method};
use crate::core::{WorkHandler, WorkItem};

type Route = Box<dyn FnMut(&HttpRequest, &mut HttpResponse)>;

/// Maps method and path to a route handler.
///
/// Every response leaves with `Connection: close`. A panicking route answers
/// 500; an unknown method or path answers a 400 JSON body.
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, HashMap<String, Route>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: FnMut(&HttpRequest, &mut HttpResponse) + 'static,
    {
        self.route(Method::Get, path, handler)
    }

    pub fn post<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: FnMut(&HttpRequest, &mut HttpResponse) + 'static,
    {
        self.route(Method::Post, path, handler)
    }

    /// Registers `handler`. The first registration of a method and path wins.
    pub fn route<F>(&mut self, method: Method, path: &str, handler: F) -> &mut Self
    where
        F: FnMut(&HttpRequest, &mut HttpResponse) + 'static,
    {
        let routes = self.routes.entry(method.clone()).or_default();
        if routes.contains_key(path) {
            warn!(%method, path, "duplicate route ignored");
        } else {
            debug!(%method, path, "route registered");
            routes.insert(path.to_string(), Box::new(handler));
        }
        self
    }

    /// Routes registered through the group get `prefix` prepended.
    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_> {
        RouteGroup {
            router: self,
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Produces the response for `request`.
    pub fn respond(&mut self, request: &HttpRequest) -> HttpResponse {
        let mut response = match self.routes.get_mut(&request.method) {
            None => unregistered("Unregistered http method."),
            Some(routes) => match routes.get_mut(&request.path) {
                None => unregistered("Unregistered http query."),
                Some(route) => {
                    let mut response = HttpResponse::new(200);
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| route(request, &mut response)));
                    if outcome.is_err() {
                        error!(method = %request.method, path = %request.path, "route panicked");
                        response = HttpResponse::new(500);
                        response.text(500, super::status_text(500));
                    }
                    response
                }
            },
        };

        response.set_header("Connection", "close");
        response
    }
}

fn unregistered(msg: &str) -> HttpResponse {
    let mut response = HttpResponse::new(400);
    let body = serde_json::json!({ "code": 400, "msg": msg });
    if response.json(400, &body).is_err() {
        response.text(400, msg);
    }
    response
}

impl WorkHandler<HttpRequest> for Router {
    fn handle(&mut self, item: &mut WorkItem<HttpRequest>) {
        let response = self.respond(item.message());
        debug!(
            conn = ?item.connection_id(),
            method = %item.message().method,
            path = %item.message().path,
            code = response.code,
            "http request handled"
        );
        item.reply(&response.to_bytes());
    }
}

/// Registration handle with a path prefix.
pub struct RouteGroup<'a> {
    router: &'a mut Router,
    prefix: String,
}

impl RouteGroup<'_> {
    pub fn get<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: FnMut(&HttpRequest, &mut HttpResponse) + 'static,
    {
        self.route(Method::Get, path, handler)
    }

    pub fn post<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: FnMut(&HttpRequest, &mut HttpResponse) + 'static,
    {
        self.route(Method::Post, path, handler)
    }

    pub fn route<F>(&mut self, method: Method, path: &str, handler: F) -> &mut Self
    where
        F: FnMut(&HttpRequest, &mut HttpResponse) + 'static,
    {
        let full = join_paths(&self.prefix, path);
        self.router.route(method, &full, handler);
        self
    }
}

fn join_paths(prefix: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return if prefix.is_empty() { "/".to_string() } else { prefix.to_string() };
    }
    format!("{}/{}", prefix, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, target: &str) -> HttpRequest {
        HttpRequest::new(method, target)
    }

    #[test]
    fn test_route_hit() {
        let mut router = Router::new();
        router.get("/hello", |req, res| {
            let name = req.param("name").unwrap_or("nobody");
            res.text(200, &format!("hello {}", name));
        });

        let response = router.respond(&request(Method::Get, "/hello?name=kai"));
        assert_eq!(response.code, 200);
        assert_eq!(response.body_str(), Some("hello kai"));
        assert_eq!(response.header("connection"), Some("close"));
    }

    #[test]
    fn test_unregistered_method_and_path() {
        let mut router = Router::new();
        router.get("/a", |_, _| {});

        let response = router.respond(&request(Method::Post, "/a"));
        assert_eq!(response.code, 400);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["msg"], "Unregistered http method.");
        assert_eq!(body["code"], 400);

        let response = router.respond(&request(Method::Get, "/b"));
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["msg"], "Unregistered http query.");
    }

    #[test]
    fn test_panicking_route_answers_500() {
        let mut router = Router::new();
        router.get("/boom", |_, _| panic!("route failure"));

        let response = router.respond(&request(Method::Get, "/boom"));
        assert_eq!(response.code, 500);
        assert_eq!(response.reason, "Internal Server Error");

        // The router keeps working afterwards
        let response = router.respond(&request(Method::Get, "/boom"));
        assert_eq!(response.code, 500);
    }

    #[test]
    fn test_duplicate_route_keeps_first() {
        let mut router = Router::new();
        router.get("/x", |_, res| {
            res.text(200, "first");
        });
        router.get("/x", |_, res| {
            res.text(200, "second");
        });

        assert_eq!(router.len(), 1);
        let response = router.respond(&request(Method::Get, "/x"));
        assert_eq!(response.body_str(), Some("first"));
    }

    #[test]
    fn test_group_prefix() {
        let mut router = Router::new();
        router.group("/api/").get("/users", |_, _| {}).post("items", |_, _| {});

        assert_eq!(router.respond(&request(Method::Get, "/api/users")).code, 200);
        assert_eq!(router.respond(&request(Method::Post, "/api/items")).code, 200);
        assert_eq!(join_paths("", ""), "/");
        assert_eq!(join_paths("/v1", "/"), "/v1");
    }

    #[test]
    fn test_handler_replies() {
        use crate::core::{WorkPool, WorkState, WorkTarget};

        let mut router = Router::new();
        router.get("/", |_, res| {
            res.text(200, "root");
        });

        let mut pool: WorkPool<HttpRequest> = WorkPool::new(1);
        *pool.next_free().unwrap().message_mut() = request(Method::Get, "/");
        pool.claim_next(WorkTarget::Connection(0)).unwrap();

        let mut seen = Vec::new();
        pool.dispatch(&mut router, |item| {
            assert_eq!(item.state(), WorkState::NeedsOutput);
            seen.push(item.payload().to_vec());
            crate::core::Delivery::Staged
        });

        assert_eq!(seen.len(), 1);
        let wire = String::from_utf8(seen.remove(0)).unwrap();
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"), "{}", wire);
        assert!(wire.ends_with("\r\n\r\nroot"));
        assert_eq!(pool.active_len(), 0);
    }
}
