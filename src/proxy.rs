//! Proxy transport kinds and the per-scheme proxy map.

use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;

/// Transport spoken by the local proxy in front of the Tor client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyTransport {
    /// Plain HTTP proxy.
    Http,
    /// SOCKS4 proxy.
    Socks4,
    /// SOCKS5 proxy (Tor's default SocksPort).
    #[default]
    Socks5,
}

impl ProxyTransport {
    /// URL scheme prefix used for this transport, if any.
    fn scheme(&self) -> Option<&'static str> {
        match self {
            ProxyTransport::Http => None,
            ProxyTransport::Socks4 => Some("socks4"),
            ProxyTransport::Socks5 => Some("socks5"),
        }
    }
}

impl FromStr for ProxyTransport {
    type Err = ConfigError;

    /// Accepts the short forms `h`/`H`, `4` and `5` as well as the full names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h" | "H" => return Ok(ProxyTransport::Http),
            "4" => return Ok(ProxyTransport::Socks4),
            "5" => return Ok(ProxyTransport::Socks5),
            _ => {}
        }
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyTransport::Http),
            "socks4" => Ok(ProxyTransport::Socks4),
            "socks5" => Ok(ProxyTransport::Socks5),
            _ => Err(ConfigError::UnknownTransport(s.to_string())),
        }
    }
}

impl fmt::Display for ProxyTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme().unwrap_or("http"))
    }
}

/// Mapping from request URL scheme to the proxy URL used for it.
///
/// Both schemes always point at the same endpoint. SOCKS transports carry an
/// explicit `socksN://` prefix; the HTTP transport is a bare `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyMap {
    /// Proxy used for `http://` URLs.
    pub http: String,
    /// Proxy used for `https://` URLs.
    pub https: String,
}

/// Join host and port, bracketing bare IPv6 literals.
pub(crate) fn endpoint(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

impl ProxyMap {
    /// Build the proxy map for a transport, host and port.
    pub fn build(transport: ProxyTransport, host: &str, port: u16) -> Self {
        let endpoint = endpoint(host, port);
        let url = match transport.scheme() {
            Some(scheme) => format!("{}://{}", scheme, endpoint),
            None => endpoint,
        };

        Self {
            http: url.clone(),
            https: url,
        }
    }

    /// Convert the map into per-scheme reqwest proxies.
    pub fn to_reqwest_proxies(&self) -> Result<Vec<reqwest::Proxy>, ConfigError> {
        let invalid = |url: &str, e: reqwest::Error| ConfigError::InvalidProxy {
            url: url.to_string(),
            reason: e.to_string(),
        };

        if self.http.starts_with(':') || self.http.contains("://:") {
            return Err(ConfigError::InvalidProxy {
                url: self.http.clone(),
                reason: "missing host".to_string(),
            });
        }

        Ok(vec![
            reqwest::Proxy::http(&self.http).map_err(|e| invalid(&self.http, e))?,
            reqwest::Proxy::https(&self.https).map_err(|e| invalid(&self.https, e))?,
        ])
    }
}
