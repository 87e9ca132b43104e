//! Client identity (user agent) selection.

use crate::error::ConfigError;
use http::header::HeaderValue;
use rand::Rng;
use std::sync::Arc;

/// Supplies the user agent presented after each identity rotation.
pub trait IdentityProvider: Send + Sync {
    /// Return a user agent string. Never empty.
    fn next_identity(&self) -> String;
}

const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36 Edg/130.0.0.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.7; rv:132.0) Gecko/20100101 Firefox/132.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36 OPR/115.0.0.0",
];

/// A fixed pool of user agents sampled uniformly on every call.
///
/// The pool is immutable and cheap to clone, so one pool can back any
/// number of handlers.
#[derive(Debug, Clone)]
pub struct UserAgentPool {
    agents: Arc<[String]>,
}

impl UserAgentPool {
    /// Create a pool from custom user agents. Blank entries are dropped;
    /// entries that are not valid header values are rejected.
    pub fn new<I, S>(agents: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let agents: Vec<String> = agents
            .into_iter()
            .map(Into::into)
            .filter(|ua| !ua.trim().is_empty())
            .collect();

        if agents.is_empty() {
            return Err(ConfigError::EmptyUserAgentPool);
        }
        if let Some(bad) = agents.iter().find(|ua| HeaderValue::from_str(ua).is_err()) {
            return Err(ConfigError::InvalidUserAgent(bad.clone()));
        }

        Ok(Self { agents: agents.into() })
    }

    /// Number of user agents in the pool.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Always false; an empty pool cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for UserAgentPool {
    fn default() -> Self {
        Self {
            agents: DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
        }
    }
}

impl IdentityProvider for UserAgentPool {
    fn next_identity(&self) -> String {
        let mut rng = rand::rng();
        let idx = rng.random_range(0..self.agents.len());
        self.agents[idx].clone()
    }
}
