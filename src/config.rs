//! Configuration for the request handler.

use crate::error::ConfigError;
use crate::proxy::{ProxyMap, ProxyTransport};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

/// How to authenticate against the Tor control port.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ControlAuth {
    /// Ask the control port which methods it accepts and pick one.
    #[default]
    Auto,
    /// No authentication (`AUTHENTICATE` with no argument).
    None,
    /// `HashedControlPassword` authentication.
    Password(String),
    /// Cookie authentication reading the given cookie file.
    Cookie(PathBuf),
}

/// Configuration for the request handler.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Transport spoken by the local proxy.
    pub proxy_transport: ProxyTransport,
    /// Host of the local proxy and control port.
    pub proxy_host: String,
    /// Port of the local proxy (Tor `SocksPort`).
    pub proxy_port: u16,
    /// Port of the Tor control channel (`ControlPort`).
    pub control_port: u16,
    /// Authentication used on the control channel.
    pub control_auth: ControlAuth,
    /// Deadline for a whole control-port conversation.
    pub control_timeout: Duration,
    /// Per-request deadline.
    pub request_timeout: Duration,
    /// Successful requests before the identity is rotated.
    pub requests_before_rotation: NonZeroU32,
    /// Failed requests before the identity is rotated.
    pub failures_before_rotation: NonZeroU32,
    /// Optional pause after a failed attempt. `None` retries immediately.
    pub retry_delay: Option<Duration>,
    /// Optional cap on attempts per second.
    pub max_requests_per_second: Option<f64>,
}

impl HandlerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> HandlerConfigBuilder {
        HandlerConfigBuilder::new()
    }

    /// Proxy map derived from the transport, host and port.
    pub fn proxy_map(&self) -> ProxyMap {
        ProxyMap::build(self.proxy_transport, &self.proxy_host, self.proxy_port)
    }

    /// Address of the control port.
    pub fn control_addr(&self) -> String {
        crate::proxy::endpoint(&self.proxy_host, self.control_port)
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            proxy_transport: ProxyTransport::Socks5,
            proxy_host: "127.0.0.1".to_string(),
            proxy_port: 9050,
            control_port: 9051,
            control_auth: ControlAuth::Auto,
            control_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            requests_before_rotation: NonZeroU32::new(15).unwrap_or(NonZeroU32::MIN),
            failures_before_rotation: NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN),
            retry_delay: None,
            max_requests_per_second: None,
        }
    }
}

/// Builder for `HandlerConfig`.
pub struct HandlerConfigBuilder {
    proxy_transport: Option<ProxyTransport>,
    proxy_host: Option<String>,
    proxy_port: Option<u16>,
    control_port: Option<u16>,
    control_auth: Option<ControlAuth>,
    control_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    requests_before_rotation: Option<u32>,
    failures_before_rotation: Option<u32>,
    retry_delay: Option<Duration>,
    max_requests_per_second: Option<f64>,
}

impl HandlerConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            proxy_transport: None,
            proxy_host: None,
            proxy_port: None,
            control_port: None,
            control_auth: None,
            control_timeout: None,
            request_timeout: None,
            requests_before_rotation: None,
            failures_before_rotation: None,
            retry_delay: None,
            max_requests_per_second: None,
        }
    }

    /// Set the proxy transport.
    pub fn proxy_transport(mut self, transport: ProxyTransport) -> Self {
        self.proxy_transport = Some(transport);
        self
    }

    /// Set the host running the proxy and the control port.
    pub fn proxy_host(mut self, host: impl Into<String>) -> Self {
        self.proxy_host = Some(host.into());
        self
    }

    /// Set the proxy port.
    pub fn proxy_port(mut self, port: u16) -> Self {
        self.proxy_port = Some(port);
        self
    }

    /// Set the control port.
    pub fn control_port(mut self, port: u16) -> Self {
        self.control_port = Some(port);
        self
    }

    /// Set the control port authentication.
    pub fn control_auth(mut self, auth: ControlAuth) -> Self {
        self.control_auth = Some(auth);
        self
    }

    /// Set the deadline for a control-port conversation.
    pub fn control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = Some(timeout);
        self
    }

    /// Set the per-request deadline.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the number of successful requests before rotating identity.
    pub fn requests_before_rotation(mut self, count: u32) -> Self {
        self.requests_before_rotation = Some(count);
        self
    }

    /// Set the number of failed requests before rotating identity.
    pub fn failures_before_rotation(mut self, count: u32) -> Self {
        self.failures_before_rotation = Some(count);
        self
    }

    /// Pause for `delay` after every failed attempt.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Limit attempts to `rps` per second.
    pub fn max_requests_per_second(mut self, rps: f64) -> Self {
        self.max_requests_per_second = Some(rps);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<HandlerConfig, ConfigError> {
        let defaults = HandlerConfig::default();

        let requests_before_rotation = match self.requests_before_rotation {
            Some(n) => NonZeroU32::new(n).ok_or(ConfigError::ZeroThreshold("requests_before_rotation"))?,
            None => defaults.requests_before_rotation,
        };
        let failures_before_rotation = match self.failures_before_rotation {
            Some(n) => NonZeroU32::new(n).ok_or(ConfigError::ZeroThreshold("failures_before_rotation"))?,
            None => defaults.failures_before_rotation,
        };

        Ok(HandlerConfig {
            proxy_transport: self.proxy_transport.unwrap_or(defaults.proxy_transport),
            proxy_host: self.proxy_host.unwrap_or(defaults.proxy_host),
            proxy_port: self.proxy_port.unwrap_or(defaults.proxy_port),
            control_port: self.control_port.unwrap_or(defaults.control_port),
            control_auth: self.control_auth.unwrap_or(defaults.control_auth),
            control_timeout: self.control_timeout.unwrap_or(defaults.control_timeout),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            requests_before_rotation,
            failures_before_rotation,
            retry_delay: self.retry_delay,
            max_requests_per_second: self.max_requests_per_second,
        })
    }
}

impl Default for HandlerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
