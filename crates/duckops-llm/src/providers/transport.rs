//! Outbound HTTP transport and the header-injecting decorator
//!
//! Adapters send every request through an [`HttpTransport`]. The default
//! transport is a `reqwest::Client`; [`HeaderTransport`] wraps any transport
//! and stamps a fixed set of headers on each request before delegating.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Request, Response};
use std::sync::Arc;
use std::time::Duration;

/// Sends fully built requests
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: Request) -> reqwest::Result<Response>;
}

#[async_trait]
impl HttpTransport for Client {
    async fn execute(&self, request: Request) -> reqwest::Result<Response> {
        Client::execute(self, request).await
    }
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    async fn execute(&self, request: Request) -> reqwest::Result<Response> {
        (**self).execute(request).await
    }
}

/// Decorator that sets fixed headers on every outgoing request
///
/// Existing values for the same header names are replaced.
pub struct HeaderTransport<T = Client> {
    base: T,
    headers: HeaderMap,
}

impl<T> std::fmt::Debug for HeaderTransport<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderTransport")
            .field("headers", &self.headers)
            .finish()
    }
}

impl<T: HttpTransport> HeaderTransport<T> {
    pub fn new<I, K, V>(headers: I, base: T) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut map = HeaderMap::new();
        for (key, value) in headers {
            let (key, value) = (key.as_ref(), value.as_ref());
            let name = HeaderName::from_bytes(key.as_bytes())
                .with_context(|| format!("Invalid header name '{}'", key))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header '{}'", key))?;
            map.insert(name, value);
        }
        Ok(Self { base, headers: map })
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

#[async_trait]
impl<T: HttpTransport> HttpTransport for HeaderTransport<T> {
    async fn execute(&self, mut request: Request) -> reqwest::Result<Response> {
        let target = request.headers_mut();
        for (name, value) in &self.headers {
            target.insert(name.clone(), value.clone());
        }
        self.base.execute(request).await
    }
}

/// Connection pool and timeout knobs for a dedicated client
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
    pub request_timeout: Duration,
}

impl PoolSettings {
    pub fn build_client(&self) -> Result<Client> {
        Client::builder()
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_idle_timeout(self.idle_timeout)
            .timeout(self.request_timeout)
            .build()
            .context("Failed to build HTTP client")
    }
}

/// Plain client with reqwest's default pooling
pub fn default_client() -> Result<Client> {
    Client::builder()
        .build()
        .context("Failed to build HTTP client")
}

#[cfg(test)]
pub(crate) mod testing {
    //! Stub transport that records requests and replays canned responses

    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// What the stub saw for one request
    #[derive(Debug, Clone)]
    pub struct Recorded {
        pub method: reqwest::Method,
        pub url: String,
        pub headers: HeaderMap,
        pub body: Option<serde_json::Value>,
    }

    #[derive(Default)]
    pub struct StubTransport {
        responses: Mutex<VecDeque<(u16, String)>>,
        pub requests: Mutex<Vec<Recorded>>,
    }

    impl StubTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn respond(self: &Arc<Self>, status: u16, body: impl Into<String>) -> Arc<Self> {
            self.responses.lock().push_back((status, body.into()));
            self.clone()
        }

        pub fn last(&self) -> Recorded {
            self.requests
                .lock()
                .last()
                .cloned()
                .expect("no request was sent")
        }

        pub fn count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl HttpTransport for StubTransport {
        async fn execute(&self, request: Request) -> reqwest::Result<Response> {
            let body = request
                .body()
                .and_then(|b| b.as_bytes())
                .and_then(|b| serde_json::from_slice(b).ok());
            self.requests.lock().push(Recorded {
                method: request.method().clone(),
                url: request.url().to_string(),
                headers: request.headers().clone(),
                body,
            });
            let (status, body) = self
                .responses
                .lock()
                .pop_front()
                .unwrap_or((200, "{}".to_string()));
            let response = http::Response::builder()
                .status(status)
                .body(body)
                .expect("valid stub response");
            Ok(Response::from(response))
        }
    }
}
