//! Mock HTTP session for unit testing
//!
//! This module provides an in-memory implementation of [`HttpSession`] that
//! serves canned responses and records every call, so the query engine and
//! record graph can be tested without a running API server.

use crate::common::{HttpRequest, HttpResponse, HttpSession, Method};
use crate::error::AciError;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Route key: method, URL without query, query pairs sorted
type RouteKey = (Method, String, Vec<(String, String)>);

#[derive(Debug, Clone)]
struct Route {
    key: RouteKey,
    response: HttpResponse,
    delay: Option<Duration>,
}

/// Mock session for testing
///
/// Routes match on method, URL and query parameters regardless of parameter
/// order. Unmatched calls get a 404. Later registrations for the same route
/// replace earlier ones.
#[derive(Debug, Clone, Default)]
pub struct MockSession {
    routes: Arc<Mutex<Vec<Route>>>,
    calls: Arc<Mutex<Vec<HttpRequest>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn route_key(method: Method, url: &str) -> RouteKey {
    match Url::parse(url) {
        Ok(parsed) => {
            let mut query: Vec<(String, String)> = parsed
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            query.sort();
            let mut bare = parsed;
            bare.set_query(None);
            (method, bare.to_string(), query)
        }
        Err(_) => (method, url.to_string(), Vec::new()),
    }
}

impl MockSession {
    /// Create a new mock session with no routes
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `response` for `method` on `url` (query string included)
    pub fn respond(&self, method: Method, url: &str, response: HttpResponse) {
        self.insert(Route {
            key: route_key(method, url),
            response,
            delay: None,
        });
    }

    /// Serve a JSON body with the given status
    pub fn respond_json(&self, method: Method, url: &str, status: u16, body: Value) {
        self.respond(method, url, HttpResponse::json_body(status, &body));
    }

    /// Serve `response` after `delay`, to shuffle completion order
    pub fn respond_with_delay(
        &self,
        method: Method,
        url: &str,
        response: HttpResponse,
        delay: Duration,
    ) {
        self.insert(Route {
            key: route_key(method, url),
            response,
            delay: Some(delay),
        });
    }

    /// Every call received so far, in arrival order
    pub fn calls(&self) -> Vec<HttpRequest> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Number of calls whose method and full URL match
    pub fn calls_to(&self, method: Method, url: &str) -> usize {
        let key = route_key(method, url);
        lock(&self.calls)
            .iter()
            .filter(|call| route_key(call.method, &call.full_url()) == key)
            .count()
    }

    fn insert(&self, route: Route) {
        let mut routes = lock(&self.routes);
        routes.retain(|existing| existing.key != route.key);
        routes.push(route);
    }
}

#[async_trait]
impl HttpSession for MockSession {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AciError> {
        let key = route_key(request.method, &request.full_url());
        lock(&self.calls).push(request);

        let route = lock(&self.routes)
            .iter()
            .find(|route| route.key == key)
            .cloned();

        match route {
            Some(route) => {
                if let Some(delay) = route.delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(route.response)
            }
            None => Ok(HttpResponse::new(
                404,
                format!("no mock route for {} {}", key.0, key.1),
            )),
        }
    }
}
