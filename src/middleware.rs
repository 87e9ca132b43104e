//! Middleware implementation for reqwest.

use crate::client::ReqwestClient;
use crate::config::HandlerConfig;
use crate::error::{ConfigError, RotationError};
use crate::handler::{Limiter, RequestHandler};
use crate::proxy::ProxyMap;
use crate::rotation::{Outcome, RotationStats, Rotator};

use anyhow::anyhow;
use async_trait::async_trait;
use http::header::{HeaderValue, USER_AGENT};
use log::{info, warn};
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::{task, time};

/// Middleware that sends every request through Tor and rotates identity on
/// the same thresholds as [`RequestHandler`].
///
/// Clones share one rotation state. Counting an outcome and any rotation it
/// triggers happen under a single lock, so a threshold crossing rotates
/// exactly once however many requests are in flight.
#[derive(Clone)]
pub struct TorRotationMiddleware {
    inner: Arc<Shared>,
}

struct Shared {
    proxies: ProxyMap,
    request_timeout: Duration,
    retry_delay: Option<Duration>,
    limiter: Option<Arc<Limiter>>,
    rotator: Mutex<Rotator>,
}

impl TorRotationMiddleware {
    /// Create a middleware talking to a local Tor client.
    pub fn new(config: HandlerConfig) -> std::result::Result<Self, ConfigError> {
        let handler = RequestHandler::new(config)?;
        info!("Tor rotation middleware using proxy {}", handler.proxies().https);
        Ok(handler.into())
    }

    /// Current counters and user agent.
    pub async fn stats(&self) -> RotationStats {
        self.inner.rotator.lock().await.stats()
    }

    /// Rotate identity now, regardless of the counters.
    pub async fn rotate(&self) -> std::result::Result<(), RotationError> {
        self.inner.rotator.lock().await.rotate().await
    }
}

impl From<RequestHandler> for TorRotationMiddleware {
    /// Reuse a configured handler's proxy, limits and rotation state.
    fn from(handler: RequestHandler) -> Self {
        Self {
            inner: Arc::new(Shared {
                proxies: handler.proxies,
                request_timeout: handler.request_timeout,
                retry_delay: handler.retry_delay,
                limiter: handler.limiter,
                rotator: Mutex::new(handler.rotator),
            }),
        }
    }
}

#[async_trait]
impl Middleware for TorRotationMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        _extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        let shared = &self.inner;
        let mut attempt = 1u64;

        loop {
            let mut proxied_request = req.try_clone().ok_or_else(|| {
                Error::Middleware(anyhow!(
                    "Request object is not cloneable. Are you passing a streaming body?"
                        .to_string()
                ))
            })?;

            if let Some(limiter) = &shared.limiter {
                limiter.until_ready().await;
            }

            let user_agent = shared.rotator.lock().await.user_agent().to_string();
            let user_agent = HeaderValue::from_str(&user_agent)
                .map_err(|e| Error::Middleware(anyhow!(e)))?;
            proxied_request.headers_mut().insert(USER_AGENT, user_agent);

            let client = ReqwestClient::proxied(&shared.proxies, shared.request_timeout)
                .map_err(|e| Error::Middleware(anyhow!(e)))?;

            let result = client.execute(proxied_request).await;
            let outcome = match &result {
                Ok(_) => Outcome::Success,
                Err(_) => Outcome::Failure,
            };

            shared
                .rotator
                .lock()
                .await
                .record(outcome)
                .await
                .map_err(|e| Error::Middleware(anyhow!(e)))?;

            match result {
                Ok(response) => return Ok(response),
                Err(err) => {
                    warn!(
                        "Request to {} failed (attempt {}): {}",
                        req.url(),
                        attempt,
                        err
                    );
                    match shared.retry_delay {
                        Some(delay) => time::sleep(delay).await,
                        None => task::yield_now().await,
                    }
                }
            }

            attempt += 1;
        }
    }
}
