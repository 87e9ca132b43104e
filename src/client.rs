//! The HTTP collaborator used to issue proxied requests.

use crate::error::TransportError;
use crate::proxy::ProxyMap;

use async_trait::async_trait;
use http::header::{HeaderValue, USER_AGENT};
use std::time::Duration;

/// Everything needed to issue one proxied GET.
#[derive(Debug, Clone, Copy)]
pub struct ProxiedGet<'a> {
    /// Target URL.
    pub url: &'a str,
    /// Per-scheme proxies the request must go through.
    pub proxies: &'a ProxyMap,
    /// Value of the `User-Agent` header.
    pub user_agent: &'a str,
    /// Deadline for the whole request.
    pub timeout: Duration,
}

/// Issues a single GET request through a proxy.
///
/// Only transport-level failures are errors; any HTTP status is a response.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send `request.url` through `request.proxies` with the given user agent
    /// and deadline.
    async fn get(&self, request: ProxiedGet<'_>) -> Result<reqwest::Response, TransportError>;
}

/// `HttpClient` backed by reqwest.
///
/// A new `reqwest::Client` is built for every request so pooled connections
/// never outlive an identity rotation.
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient;

impl ReqwestClient {
    /// Create a reqwest-backed client.
    pub fn new() -> Self {
        Self
    }

    /// Build a client routed through `proxies`.
    pub(crate) fn proxied(
        proxies: &ProxyMap,
        timeout: Duration,
    ) -> Result<reqwest::Client, TransportError> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0);
        for proxy in proxies.to_reqwest_proxies()? {
            builder = builder.proxy(proxy);
        }
        builder.build().map_err(TransportError::Client)
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, request: ProxiedGet<'_>) -> Result<reqwest::Response, TransportError> {
        let client = Self::proxied(request.proxies, request.timeout)?;
        let user_agent = HeaderValue::from_str(request.user_agent)?;

        client
            .get(request.url)
            .header(USER_AGENT, user_agent)
            .send()
            .await
            .map_err(TransportError::Request)
    }
}
