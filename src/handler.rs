//! The request handler: proxied GETs with threshold-triggered rotation.

use crate::client::{HttpClient, ProxiedGet, ReqwestClient};
use crate::config::HandlerConfig;
use crate::control::{CircuitController, TorController};
use crate::error::{ConfigError, RotationError};
use crate::identity::{IdentityProvider, UserAgentPool};
use crate::proxy::ProxyMap;
use crate::rotation::{Checkpoint, Outcome, RotationStats, Rotator};

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use log::{debug, warn};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::{task, time};

pub(crate) type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Build the optional attempt limiter.
pub(crate) fn rate_limiter(max_rps: Option<f64>) -> Option<Arc<Limiter>> {
    let rps = max_rps.filter(|rps| rps.is_finite() && *rps > 0.0)?;
    let quota = if rps < 1.0 {
        Quota::with_period(Duration::from_secs_f64(1.0 / rps))?
    } else {
        Quota::per_second(NonZeroU32::new(rps.floor() as u32).unwrap_or(NonZeroU32::MIN))
    };
    Some(Arc::new(RateLimiter::direct(quota)))
}

/// Issues GET requests through the Tor proxy, retrying transport failures
/// forever and rotating identity every `requests_before_rotation` successes
/// or `failures_before_rotation` failures.
///
/// `get` takes `&mut self`, so a handler serves one request at a time. Use
/// [`TorRotationMiddleware`](crate::TorRotationMiddleware) to share one
/// rotation policy between tasks.
pub struct RequestHandler {
    pub(crate) client: Arc<dyn HttpClient>,
    pub(crate) proxies: ProxyMap,
    pub(crate) request_timeout: Duration,
    pub(crate) retry_delay: Option<Duration>,
    pub(crate) limiter: Option<Arc<Limiter>>,
    pub(crate) rotator: Rotator,
}

impl RequestHandler {
    /// Create a handler talking to a local Tor client.
    pub fn new(config: HandlerConfig) -> Result<Self, ConfigError> {
        let controller = Arc::new(TorController::from_config(&config));
        Self::with_collaborators(
            config,
            Arc::new(ReqwestClient::new()),
            controller,
            Arc::new(UserAgentPool::default()),
        )
    }

    /// Create a handler with custom collaborators.
    pub fn with_collaborators(
        config: HandlerConfig,
        client: Arc<dyn HttpClient>,
        controller: Arc<dyn CircuitController>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, ConfigError> {
        let proxies = config.proxy_map();
        proxies.to_reqwest_proxies()?;

        Ok(Self {
            client,
            proxies,
            request_timeout: config.request_timeout,
            retry_delay: config.retry_delay,
            limiter: rate_limiter(config.max_requests_per_second),
            rotator: Rotator::new(&config, controller, identity, None),
        })
    }

    /// Run `hook` before a rotation failure is returned.
    pub fn with_autosave(mut self, hook: impl Checkpoint + 'static) -> Self {
        self.rotator.set_autosave(Arc::new(hook));
        self
    }

    /// Fetch `url`, retrying until a response arrives.
    ///
    /// Any HTTP status counts as a response. The only error is a failed
    /// identity rotation, returned after the autosave hook has run.
    pub async fn get(&mut self, url: &str) -> Result<reqwest::Response, RotationError> {
        let mut attempt = 1u64;

        loop {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            let request = ProxiedGet {
                url,
                proxies: &self.proxies,
                user_agent: self.rotator.user_agent(),
                timeout: self.request_timeout,
            };

            match self.client.get(request).await {
                Ok(response) => {
                    debug!("GET {} -> {} (attempt {})", url, response.status(), attempt);
                    self.rotator.record(Outcome::Success).await?;
                    return Ok(response);
                }
                Err(err) => {
                    warn!("Exception raised while requesting {} (attempt {}): {}", url, attempt, err);
                    self.rotator.record(Outcome::Failure).await?;
                    match self.retry_delay {
                        Some(delay) => time::sleep(delay).await,
                        None => task::yield_now().await,
                    }
                }
            }

            attempt += 1;
        }
    }

    /// Rotate identity now, regardless of the counters.
    pub async fn rotate(&mut self) -> Result<(), RotationError> {
        self.rotator.rotate().await
    }

    /// Current counters and user agent.
    pub fn stats(&self) -> RotationStats {
        self.rotator.stats()
    }

    /// The proxy map every request goes through.
    pub fn proxies(&self) -> &ProxyMap {
        &self.proxies
    }
}
