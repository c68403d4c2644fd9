//! Query engine for the ACI API
//!
//! A [`Request`] targets one collection or detail URL. It builds the URL,
//! attaches filters and the auth header, classifies HTTP outcomes and, for
//! GET, drives pagination as a lazy stream of raw JSON values.

use crate::common::version::ApiVersion;
use crate::common::{HttpRequest, HttpResponse, HttpSession, Method, PaginatedResponse};
use crate::error::AciError;
use async_stream::try_stream;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default bound on concurrently fetched pages
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Shape of a decoded GET response
#[derive(Debug)]
enum Payload {
    Page(PaginatedResponse<Value>),
    List(Vec<Value>),
    Single(Value),
}

impl Payload {
    fn classify(value: Value) -> Self {
        match value {
            Value::Array(items) => Payload::List(items),
            Value::Object(mut map) if map.get("results").is_some_and(Value::is_array) => {
                let results = match map.remove("results") {
                    Some(Value::Array(results)) => results,
                    _ => Vec::new(),
                };
                let count = map
                    .get("count")
                    .and_then(Value::as_u64)
                    .unwrap_or(results.len() as u64);
                let link = |name: &str| map.get(name).and_then(Value::as_str).map(String::from);
                Payload::Page(PaginatedResponse {
                    count,
                    next: link("next"),
                    previous: link("previous"),
                    results,
                })
            }
            other => Payload::Single(other),
        }
    }

    /// Follow-up calls are expected to be pages; anything else ends the walk
    fn into_page(self) -> PaginatedResponse<Value> {
        match self {
            Payload::Page(page) => page,
            Payload::List(results) => {
                warn!("Expected a page on a follow-up call, got a bare list of {}", results.len());
                PaginatedResponse {
                    count: results.len() as u64,
                    next: None,
                    previous: None,
                    results,
                }
            }
            Payload::Single(value) => {
                warn!("Expected a page on a follow-up call, got a single object");
                PaginatedResponse {
                    count: 1,
                    next: None,
                    previous: None,
                    results: vec![value],
                }
            }
        }
    }
}

/// One logical call against a collection or detail endpoint
#[derive(Clone)]
pub struct Request {
    base: String,
    url: String,
    key: Option<String>,
    filters: Vec<(String, String)>,
    limit: Option<u64>,
    offset: Option<u64>,
    token: Option<String>,
    threading: bool,
    max_workers: usize,
    session: Arc<dyn HttpSession>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url)
            .field("filters", &self.filters)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("threading", &self.threading)
            .field("max_workers", &self.max_workers)
            .finish_non_exhaustive()
    }
}

impl Request {
    /// Create a request against `base` (collection route)
    pub fn new(base: &str, session: Arc<dyn HttpSession>) -> Self {
        let base = Self::normalize_url(base);
        Self {
            url: base.clone(),
            base,
            key: None,
            filters: Vec::new(),
            limit: None,
            offset: None,
            token: None,
            threading: false,
            max_workers: DEFAULT_MAX_WORKERS,
            session,
        }
    }

    /// Target the detail route `base + key + "/"`
    pub fn with_key(mut self, key: impl ToString) -> Self {
        let key = key.to_string();
        self.url = format!("{}{}/", self.base, key);
        self.key = Some(key);
        self
    }

    pub fn with_filters(mut self, filters: Vec<(String, String)>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: Option<u64>) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Fetch remaining pages concurrently, at most `max_workers` at a time
    pub fn with_threading(mut self, threading: bool, max_workers: usize) -> Self {
        self.threading = threading;
        self.max_workers = max_workers.max(1);
        self
    }

    /// Effective URL (detail route when a key is set)
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Append a trailing slash if absent
    pub fn normalize_url(url: &str) -> String {
        if url.ends_with('/') {
            url.to_string()
        } else {
            format!("{}/", url)
        }
    }

    /// Read the `API-Version` header from the API root
    ///
    /// A 403 still counts: the server may deny the body while exposing the
    /// header. Returns an empty string when the header is absent.
    pub async fn get_version(&self) -> Result<String, AciError> {
        let url = self.base.clone();
        let response = self
            .session
            .send(self.build(Method::Get, url.clone(), Vec::new(), None))
            .await?;

        if response.ok() || response.status == 403 {
            Ok(response.header("API-Version").unwrap_or_default().to_string())
        } else {
            Err(AciError::from_response(Method::Get, url, None, &response))
        }
    }

    /// Fetch the OpenAPI document, choosing the route by API version
    pub async fn get_openapi(&self) -> Result<Value, AciError> {
        let current = ApiVersion::parse(&self.get_version().await?)?;
        let schema_since = ApiVersion::parse("3.5")?;

        let (url, params) = if current >= schema_since {
            (format!("{}schema/", self.base), Vec::new())
        } else {
            (
                format!("{}docs/", self.base),
                vec![("format".to_string(), "openapi".to_string())],
            )
        };
        debug!("Fetching OpenAPI document for API version {}", current);

        let response = self
            .session
            .send(self.build(Method::Get, url.clone(), params, None))
            .await?;
        self.decode(Method::Get, Some(&url), response)
    }

    /// Fetch `{base}status/`
    pub async fn get_status(&self) -> Result<Value, AciError> {
        let url = format!("{}status/", self.base);
        self.call(Method::Get, Some(&url), Vec::new(), None).await
    }

    /// Number of objects matching the filters, from a one-item page
    pub async fn get_count(&self) -> Result<u64, AciError> {
        let params = vec![
            ("limit".to_string(), "1".to_string()),
            ("brief".to_string(), "1".to_string()),
        ];
        let value = self.call(Method::Get, None, params, None).await?;
        value.get("count").and_then(Value::as_u64).ok_or_else(|| {
            AciError::Api(format!("response from {} carries no count", self.url))
        })
    }

    /// OPTIONS on the request URL
    pub async fn options(&self) -> Result<Value, AciError> {
        self.call(Method::Options, None, Vec::new(), None).await
    }

    /// Lazily stream the objects behind this request
    ///
    /// Each HTTP call happens only when the consumer polls past the items
    /// already fetched. The stream is forward-only; dropping it cancels any
    /// outstanding page fetches.
    pub fn get(
        &self,
        add_params: Option<Vec<(String, String)>>,
    ) -> impl Stream<Item = Result<Value, AciError>> + Send + 'static {
        let request = self.clone();

        try_stream! {
            let params = match add_params {
                Some(params) if !params.is_empty() => params,
                _ => request.first_page_params(),
            };

            let first = request.call(Method::Get, None, params, None).await?;
            match Payload::classify(first) {
                Payload::Single(value) => {
                    yield value;
                }
                Payload::List(items) => {
                    for item in items {
                        yield item;
                    }
                }
                Payload::Page(page) if request.offset.is_some() => {
                    for item in page.results {
                        yield item;
                    }
                }
                Payload::Page(page) if request.threading => {
                    for item in request.fetch_concurrent(page).await? {
                        yield item;
                    }
                }
                Payload::Page(page) => {
                    let count = page.count;
                    let mut seen = page.results.len() as u64;
                    let mut next = page.next;
                    for item in page.results {
                        yield item;
                    }

                    let mut first_run = true;
                    while let Some(next_url) = next.take() {
                        let value = if first_run {
                            // Re-request with an explicit window so inconsistent
                            // default page sizes do not skip or repeat items.
                            let limit = request.limit.filter(|l| *l > 0).unwrap_or(count);
                            let params = vec![
                                ("limit".to_string(), limit.to_string()),
                                ("offset".to_string(), seen.to_string()),
                            ];
                            request.call(Method::Get, None, params, None).await?
                        } else {
                            request.call(Method::Get, Some(&next_url), Vec::new(), None).await?
                        };
                        first_run = false;

                        let page = Payload::classify(value).into_page();
                        seen += page.results.len() as u64;
                        next = page.next;
                        for item in page.results {
                            yield item;
                        }
                    }
                }
            }
        }
    }

    /// Create; a 409 surfaces as [`AciError::AllocationConflict`]
    pub async fn post(&self, data: &Value) -> Result<Value, AciError> {
        self.call(Method::Post, None, Vec::new(), Some(data)).await
    }

    pub async fn put(&self, data: &Value) -> Result<Value, AciError> {
        self.call(Method::Put, None, Vec::new(), Some(data)).await
    }

    pub async fn patch(&self, data: &Value) -> Result<Value, AciError> {
        self.call(Method::Patch, None, Vec::new(), Some(data)).await
    }

    /// Delete; the response body is never decoded
    pub async fn delete(&self, data: Option<&Value>) -> Result<bool, AciError> {
        self.send(Method::Delete, None, Vec::new(), data).await?;
        Ok(true)
    }

    fn first_page_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
            if limit != 0 {
                if let Some(offset) = self.offset {
                    params.push(("offset".to_string(), offset.to_string()));
                }
            }
        }
        params
    }

    async fn fetch_concurrent(
        &self,
        first: PaginatedResponse<Value>,
    ) -> Result<Vec<Value>, AciError> {
        let mut results = first.results;
        let Some(next_url) = first.next else {
            return Ok(results);
        };

        let page_size = results.len() as u64;
        let pages = if page_size == 0 {
            0
        } else {
            first.count.div_ceil(page_size)
        };
        let offsets: Vec<u64> = (1..pages).map(|page| page * page_size).collect();

        if offsets.len() <= 1 {
            let value = self.call(Method::Get, Some(&next_url), Vec::new(), None).await?;
            results.extend(Payload::classify(value).into_page().results);
            return Ok(results);
        }

        debug!(
            "Fetching {} pages of {} concurrently from {} (max {} in flight)",
            offsets.len(),
            page_size,
            self.url,
            self.max_workers
        );

        // Pages are collected in completion order so the first failing call
        // aborts the batch at once; sorting restores offset order.
        let mut pages: Vec<(u64, Vec<Value>)> = stream::iter(offsets)
            .map(|offset| async move {
                let page = self.fetch_page(offset, page_size).await?;
                Ok::<_, AciError>((offset, page))
            })
            .buffer_unordered(self.max_workers)
            .try_collect()
            .await?;
        pages.sort_unstable_by_key(|(offset, _)| *offset);

        for (_, page) in pages {
            results.extend(page);
        }
        Ok(results)
    }

    async fn fetch_page(&self, offset: u64, limit: u64) -> Result<Vec<Value>, AciError> {
        let params = vec![
            ("offset".to_string(), offset.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        let value = self.call(Method::Get, None, params, None).await?;
        Ok(Payload::classify(value).into_page().results)
    }

    /// Issue one call and decode its JSON body
    async fn call(
        &self,
        method: Method,
        url_override: Option<&str>,
        add_params: Vec<(String, String)>,
        data: Option<&Value>,
    ) -> Result<Value, AciError> {
        let response = self.send(method, url_override, add_params, data).await?;
        self.decode(method, url_override, response)
    }

    /// Issue one call; non-2xx statuses become errors
    async fn send(
        &self,
        method: Method,
        url_override: Option<&str>,
        add_params: Vec<(String, String)>,
        data: Option<&Value>,
    ) -> Result<HttpResponse, AciError> {
        // A `next` link already carries every query parameter
        let (url, params) = match url_override {
            Some(url) => (url.to_string(), Vec::new()),
            None => {
                let mut params = self.filters.clone();
                for (name, value) in add_params {
                    match params.iter_mut().find(|(k, _)| *k == name) {
                        Some(existing) => existing.1 = value,
                        None => params.push((name, value)),
                    }
                }
                (self.url.clone(), params)
            }
        };

        let request = self.build(method, url, params, data.cloned());
        let full_url = request.full_url();
        debug!("{} {}", method, full_url);

        let response = self.session.send(request).await?;
        if response.ok() {
            Ok(response)
        } else {
            Err(AciError::from_response(method, full_url, data.cloned(), &response))
        }
    }

    fn decode(
        &self,
        method: Method,
        url_override: Option<&str>,
        response: HttpResponse,
    ) -> Result<Value, AciError> {
        if !response.ok() {
            let url = url_override.unwrap_or(&self.url).to_string();
            return Err(AciError::from_response(method, url, None, &response));
        }
        response.json().map_err(|_| AciError::MalformedResponse {
            url: url_override.unwrap_or(&self.url).to_string(),
            status: response.status,
            body: response.text.chars().take(500).collect(),
        })
    }

    fn build(
        &self,
        method: Method,
        url: String,
        params: Vec<(String, String)>,
        body: Option<Value>,
    ) -> HttpRequest {
        let mut headers = vec![("accept".to_string(), "application/json".to_string())];
        if body.is_some() {
            headers.push(("content-type".to_string(), "application/json".to_string()));
        }
        if let Some(token) = &self.token {
            headers.push(("authorization".to_string(), format!("Token {}", token)));
        }
        HttpRequest {
            method,
            url,
            headers,
            params,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSession;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;

    const BASE: &str = "http://aci/api/dcim/devices/";

    fn device(i: u64) -> Value {
        json!({"id": i, "url": format!("{BASE}{i}/"), "name": format!("leaf{i}")})
    }

    fn page(range: std::ops::Range<u64>, count: u64, next: Option<String>) -> Value {
        json!({
            "count": count,
            "next": next,
            "previous": null,
            "results": range.map(device).collect::<Vec<_>>(),
        })
    }

    fn ids(values: &[Value]) -> Vec<u64> {
        values.iter().map(|v| v["id"].as_u64().unwrap()).collect()
    }

    fn request(session: &MockSession) -> Request {
        Request::new(BASE, Arc::new(session.clone()))
    }

    async fn collect(request: &Request) -> Result<Vec<Value>, AciError> {
        request.get(None).try_collect().await
    }

    #[test]
    fn test_normalize_url_is_idempotent() {
        let once = Request::normalize_url("http://aci/api");
        assert_eq!(once, "http://aci/api/");
        assert_eq!(Request::normalize_url(&once), once);
    }

    #[test]
    fn test_key_selects_detail_route() {
        let session = MockSession::new();
        let request = Request::new("http://aci/api/dcim/devices", Arc::new(session)).with_key(7);
        assert_eq!(request.url(), "http://aci/api/dcim/devices/7/");
        assert_eq!(request.key(), Some("7"));
    }

    #[tokio::test]
    async fn test_sequential_pagination_normalizes_first_follow_up() {
        let session = MockSession::new();
        session.respond_json(
            Method::Get,
            BASE,
            200,
            page(0..10, 25, Some(format!("{BASE}?limit=10&offset=10"))),
        );
        // First follow-up asks for everything remaining in one window
        session.respond_json(
            Method::Get,
            &format!("{BASE}?limit=25&offset=10"),
            200,
            page(10..25, 25, None),
        );

        let items = collect(&request(&session)).await.unwrap();
        assert_eq!(ids(&items), (0..25).collect::<Vec<_>>());
        assert_eq!(session.call_count(), 2);
    }

    #[tokio::test]
    async fn test_sequential_pagination_follows_next_verbatim_after_first_run() {
        let session = MockSession::new();
        session.respond_json(
            Method::Get,
            &format!("{BASE}?limit=10"),
            200,
            page(0..10, 25, Some(format!("{BASE}?limit=10&offset=10"))),
        );
        session.respond_json(
            Method::Get,
            &format!("{BASE}?limit=10&offset=10"),
            200,
            page(10..20, 25, Some(format!("{BASE}?limit=10&offset=20&cursor=abc"))),
        );
        session.respond_json(
            Method::Get,
            &format!("{BASE}?limit=10&offset=20&cursor=abc"),
            200,
            page(20..25, 25, None),
        );

        let items = collect(&request(&session).with_limit(Some(10))).await.unwrap();
        assert_eq!(ids(&items), (0..25).collect::<Vec<_>>());
        assert_eq!(session.call_count(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_pagination_preserves_offset_order() {
        let session = MockSession::new();
        session.respond_json(
            Method::Get,
            BASE,
            200,
            page(0..10, 25, Some(format!("{BASE}?limit=10&offset=10"))),
        );
        // The earlier page completes last
        session.respond_with_delay(
            Method::Get,
            &format!("{BASE}?limit=10&offset=10"),
            HttpResponse::json_body(200, &page(10..20, 25, None)),
            Duration::from_millis(50),
        );
        session.respond_json(
            Method::Get,
            &format!("{BASE}?limit=10&offset=20"),
            200,
            page(20..25, 25, None),
        );

        let items = collect(&request(&session).with_threading(true, 4)).await.unwrap();
        assert_eq!(ids(&items), (0..25).collect::<Vec<_>>());
        assert_eq!(session.call_count(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_pagination_with_one_page_left_follows_next() {
        let session = MockSession::new();
        session.respond_json(
            Method::Get,
            BASE,
            200,
            page(0..10, 15, Some(format!("{BASE}?page=2"))),
        );
        session.respond_json(Method::Get, &format!("{BASE}?page=2"), 200, page(10..15, 15, None));

        let items = collect(&request(&session).with_threading(true, 4)).await.unwrap();
        assert_eq!(ids(&items), (0..15).collect::<Vec<_>>());
        assert_eq!(session.calls()[1].full_url(), format!("{BASE}?page=2"));
    }

    #[tokio::test]
    async fn test_concurrent_page_failure_aborts_whole_get() {
        let session = MockSession::new();
        session.respond_json(
            Method::Get,
            BASE,
            200,
            page(0..10, 30, Some(format!("{BASE}?limit=10&offset=10"))),
        );
        session.respond_json(
            Method::Get,
            &format!("{BASE}?limit=10&offset=10"),
            200,
            page(10..20, 30, None),
        );
        session.respond(
            Method::Get,
            &format!("{BASE}?limit=10&offset=20"),
            HttpResponse::new(500, "boom"),
        );

        let mut stream = Box::pin(request(&session).with_threading(true, 2).get(None));
        let first = stream.next().await.unwrap();
        match first {
            Err(AciError::RequestFailure(failure)) => assert_eq!(failure.status, 500),
            other => panic!("expected the page failure before any item, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_page_failure_does_not_wait_for_slow_pages() {
        let session = MockSession::new();
        let second = format!("{BASE}?limit=10&offset=10");
        let third = format!("{BASE}?limit=10&offset=20");
        session.respond_json(Method::Get, BASE, 200, page(0..10, 30, Some(second.clone())));
        session.respond_with_delay(
            Method::Get,
            &second,
            HttpResponse::json_body(200, &page(10..20, 30, None)),
            Duration::from_secs(30),
        );
        session.respond(Method::Get, &third, HttpResponse::new(502, "bad gateway"));

        let request = request(&session).with_threading(true, 2);
        let mut stream = Box::pin(request.get(None));
        let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("failure should surface before the slow page completes");
        match first {
            Some(Err(AciError::RequestFailure(failure))) => assert_eq!(failure.status, 502),
            other => panic!("expected the page failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_single_page_passthrough() {
        let session = MockSession::new();
        session.respond_json(Method::Get, BASE, 200, page(0..7, 7, None));

        for threading in [false, true] {
            let items = collect(&request(&session).with_threading(threading, 4)).await.unwrap();
            assert_eq!(items.len(), 7);
        }
        assert_eq!(session.call_count(), 2);
    }

    #[tokio::test]
    async fn test_explicit_offset_pins_one_page() {
        let session = MockSession::new();
        session.respond_json(
            Method::Get,
            &format!("{BASE}?limit=10&offset=10"),
            200,
            page(10..20, 25, Some(format!("{BASE}?limit=10&offset=20"))),
        );

        let request = request(&session).with_limit(Some(10)).with_offset(Some(10));
        let items = collect(&request).await.unwrap();
        assert_eq!(ids(&items), (10..20).collect::<Vec<_>>());
        assert_eq!(session.call_count(), 1);
    }

    #[tokio::test]
    async fn test_bare_object_and_bare_list() {
        let session = MockSession::new();
        session.respond_json(Method::Get, &format!("{BASE}3/"), 200, device(3));
        session.respond_json(
            Method::Get,
            &format!("{BASE}3/interfaces/"),
            200,
            json!([device(1), device(2)]),
        );

        let single = collect(&request(&session).with_key(3)).await.unwrap();
        assert_eq!(ids(&single), vec![3]);

        let list = Request::new(&format!("{BASE}3/interfaces"), Arc::new(session.clone()));
        assert_eq!(ids(&collect(&list).await.unwrap()), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let session = MockSession::new();
        session.respond_json(
            Method::Get,
            BASE,
            200,
            page(0..2, 4, Some(format!("{BASE}?offset=2"))),
        );
        session.respond_json(
            Method::Get,
            &format!("{BASE}?limit=4&offset=2"),
            200,
            page(2..4, 4, None),
        );

        let request = request(&session);
        let stream = request.get(None);
        assert_eq!(session.call_count(), 0);

        let mut stream = Box::pin(stream);
        stream.next().await.unwrap().unwrap();
        stream.next().await.unwrap().unwrap();
        assert_eq!(session.call_count(), 1);

        stream.next().await.unwrap().unwrap();
        assert_eq!(session.call_count(), 2);
    }

    #[tokio::test]
    async fn test_filters_and_auth_header_sent() {
        let session = MockSession::new();
        session.respond_json(
            Method::Get,
            &format!("{BASE}?site=dc1&limit=5"),
            200,
            page(0..1, 1, None),
        );

        let request = request(&session)
            .with_filters(vec![("site".to_string(), "dc1".to_string())])
            .with_limit(Some(5))
            .with_token(Some("s3cret".to_string()));
        collect(&request).await.unwrap();

        let call = &session.calls()[0];
        assert_eq!(call.header("authorization"), Some("Token s3cret"));
        assert_eq!(call.header("accept"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_conflict_only_signalled_on_create() {
        let session = MockSession::new();
        session.respond_json(Method::Post, BASE, 409, json!({"detail": "pool exhausted"}));
        session.respond_json(Method::Get, BASE, 409, json!({"detail": "conflict"}));

        let request = request(&session);
        let post = request.post(&json!({"name": "leaf9"})).await;
        assert!(matches!(post, Err(AciError::AllocationConflict(_))));

        let get = collect(&request).await;
        assert!(matches!(get, Err(AciError::RequestFailure(_))));
    }

    #[tokio::test]
    async fn test_not_found_and_malformed_bodies() {
        let session = MockSession::new();
        session.respond(
            Method::Get,
            &format!("{BASE}99/"),
            HttpResponse::new(404, "<html>gone</html>"),
        );
        session.respond(
            Method::Get,
            &format!("{BASE}1/"),
            HttpResponse::new(200, "<html>login</html>"),
        );

        let err = collect(&request(&session).with_key(99)).await.unwrap_err();
        assert_eq!(err.to_string(), format!("resource not found at {BASE}99/"));

        let err = collect(&request(&session).with_key(1)).await.unwrap_err();
        assert!(matches!(err, AciError::MalformedResponse { status: 200, .. }));
    }

    #[tokio::test]
    async fn test_mutations_return_decoded_bodies() {
        let session = MockSession::new();
        session.respond_json(Method::Post, BASE, 201, device(30));
        session.respond_json(Method::Put, &format!("{BASE}30/"), 200, device(30));
        session.respond_json(
            Method::Patch,
            &format!("{BASE}30/"),
            200,
            json!({"id": 30, "name": "renamed"}),
        );
        session.respond(Method::Delete, &format!("{BASE}30/"), HttpResponse::new(204, ""));

        let created = request(&session).post(&json!({"name": "leaf30"})).await.unwrap();
        assert_eq!(created["id"], 30);

        let detail = request(&session).with_key(30);
        assert_eq!(detail.put(&device(30)).await.unwrap()["name"], "leaf30");
        assert_eq!(detail.patch(&json!({"name": "renamed"})).await.unwrap()["name"], "renamed");
        assert!(detail.delete(None).await.unwrap());

        let calls = session.calls();
        assert_eq!(calls[0].header("content-type"), Some("application/json"));
        assert_eq!(calls[0].body, Some(json!({"name": "leaf30"})));
        assert_eq!(calls[3].body, None);
    }

    #[tokio::test]
    async fn test_version_header_and_forbidden_root() {
        let session = MockSession::new();
        session.respond(
            Method::Get,
            "http://aci/api/",
            HttpResponse::new(403, "").with_header("API-Version", "3.6"),
        );
        let root = Request::new("http://aci/api", Arc::new(session.clone()));
        assert_eq!(root.get_version().await.unwrap(), "3.6");

        let session = MockSession::new();
        session.respond_json(Method::Get, "http://aci/api/", 200, json!({}));
        let root = Request::new("http://aci/api", Arc::new(session.clone()));
        assert_eq!(root.get_version().await.unwrap(), "");

        let session = MockSession::new();
        session.respond(Method::Get, "http://aci/api/", HttpResponse::new(500, "down"));
        let root = Request::new("http://aci/api", Arc::new(session.clone()));
        assert!(matches!(root.get_version().await, Err(AciError::RequestFailure(_))));
    }

    #[tokio::test]
    async fn test_openapi_route_follows_version() {
        for (version, url) in [
            ("3.4", "http://aci/api/docs/?format=openapi"),
            ("3.5-beta1", "http://aci/api/docs/?format=openapi"),
            ("3.5", "http://aci/api/schema/"),
            ("3.10", "http://aci/api/schema/"),
        ] {
            let session = MockSession::new();
            session.respond(
                Method::Get,
                "http://aci/api/",
                HttpResponse::json_body(200, &json!({})).with_header("API-Version", version),
            );
            session.respond_json(Method::Get, url, 200, json!({"openapi": "3.0.3", "paths": {}}));

            let root = Request::new("http://aci/api/", Arc::new(session.clone()));
            let document = root.get_openapi().await.unwrap();
            assert_eq!(document["openapi"], "3.0.3", "version {version}");
            assert_eq!(session.calls()[1].full_url(), url);
        }
    }

    #[tokio::test]
    async fn test_openapi_requires_a_version() {
        let session = MockSession::new();
        session.respond_json(Method::Get, "http://aci/api/", 200, json!({}));
        let root = Request::new("http://aci/api/", Arc::new(session));
        assert!(matches!(root.get_openapi().await, Err(AciError::VersionParse(_))));
    }

    #[tokio::test]
    async fn test_count_uses_brief_single_item_page() {
        let session = MockSession::new();
        session.respond_json(
            Method::Get,
            &format!("{BASE}?site=dc1&limit=1&brief=1"),
            200,
            page(0..1, 42, None),
        );

        let request = request(&session).with_filters(vec![("site".to_string(), "dc1".to_string())]);
        assert_eq!(request.get_count().await.unwrap(), 42);
    }
}
