// src/middleware.rs
//! Framework-neutral request interceptors.
//!
//! A [`MiddlewareChain`] runs its interceptors in registration order around a
//! final [`Handler`]. Each interceptor gets the request and a [`Next`] it may
//! call to continue the chain, or skip to answer early.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::algorithms::RateLimiter;

pub const TRACE_ID_HEADER: &str = "X-Trace-ID";
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Incoming request as seen by interceptors and handlers
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    /// Socket address of the direct peer, if known
    pub peer_addr: Option<String>,
    /// Set by [`TraceIdInterceptor`]
    pub trace_id: Option<String>,
    // Keys are lowercased
    headers: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_peer_addr(mut self, addr: impl Into<String>) -> Self {
        self.peer_addr = Some(addr.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Outgoing response with a JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
    headers: Vec<(String, String)>,
}

impl Response {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            headers: Vec::new(),
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    /// Replaces any existing header with the same name
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

/// Terminal request handler
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: &mut RequestContext) -> Response;
}

#[async_trait]
impl<F> Handler for F
where
    F: Fn(&RequestContext) -> Response + Send + Sync,
{
    async fn handle(&self, request: &mut RequestContext) -> Response {
        self(request)
    }
}

/// Wraps the rest of the chain
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, request: &mut RequestContext, next: Next<'_>) -> Response;
}

/// Remainder of a chain, handed to each interceptor
pub struct Next<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub async fn run(self, request: &mut RequestContext) -> Response {
        match self.interceptors.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    interceptors: rest,
                    handler: self.handler,
                };
                current.intercept(request, next).await
            }
            None => self.handler.handle(request).await,
        }
    }
}

/// Ordered interceptors around one handler
pub struct MiddlewareChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
    handler: Arc<dyn Handler>,
}

impl MiddlewareChain {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self {
            interceptors: Vec::new(),
            handler,
        }
    }

    /// Appends an interceptor; the first added runs outermost
    pub fn with(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub async fn handle(&self, mut request: RequestContext) -> Response {
        let next = Next {
            interceptors: &self.interceptors,
            handler: self.handler.as_ref(),
        };
        next.run(&mut request).await
    }
}

/// Propagates `X-Trace-ID`, falling back to `X-Request-ID` or a fresh UUID
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceIdInterceptor;

#[async_trait]
impl Interceptor for TraceIdInterceptor {
    async fn intercept(&self, request: &mut RequestContext, next: Next<'_>) -> Response {
        let trace_id = request
            .header(TRACE_ID_HEADER)
            .or_else(|| request.header(REQUEST_ID_HEADER))
            .filter(|id| !id.is_empty())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        request.trace_id = Some(trace_id.clone());
        debug!(trace_id = %trace_id, method = %request.method, path = %request.path, "Request started");

        let mut response = next.run(request).await;
        response.set_header(TRACE_ID_HEADER, trace_id);
        response
    }
}

type KeyFn = dyn Fn(&RequestContext) -> String + Send + Sync;

/// Applies a [`RateLimiter`] to every request passing through
pub struct RateLimitInterceptor {
    limiter: Arc<RateLimiter>,
    limit: u64,
    window_secs: u64,
    key_fn: Option<Arc<KeyFn>>,
}

impl RateLimitInterceptor {
    pub fn new(limiter: Arc<RateLimiter>, limit: u64, window_secs: u64) -> Self {
        Self {
            limiter,
            limit,
            window_secs,
            key_fn: None,
        }
    }

    /// Overrides the default key, the client identifier
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&RequestContext) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }
}

#[async_trait]
impl Interceptor for RateLimitInterceptor {
    async fn intercept(&self, request: &mut RequestContext, next: Next<'_>) -> Response {
        let key = match &self.key_fn {
            Some(key_fn) => key_fn(&*request),
            None => self.limiter.client_identifier(request),
        };

        let status = self
            .limiter
            .check_rate_limit(&key, Some(self.limit), Some(self.window_secs))
            .await;

        let mut response = if status.allowed {
            next.run(request).await
        } else {
            info!(key = %key, path = %request.path, "Request rejected by rate limit");
            Response::json(
                429,
                json!({
                    "error": "Rate Limit Exceeded",
                    "message": format!(
                        "Too many requests. Limit: {} requests per {} seconds",
                        self.limit, self.window_secs
                    ),
                    "retry_after": status.retry_after(Utc::now().timestamp()),
                    "trace_id": request.trace_id,
                }),
            )
        };

        for (name, value) in status.headers() {
            response.set_header(name, value);
        }
        response
    }
}
