//! # reqwest-tor-rotator
//!
//! Resilient GET requests through a Tor proxy for reqwest.
//!
//! Requests go through the local Tor SOCKS (or HTTP) port. Transport failures
//! are retried without limit, and the Tor identity is rotated with
//! `SIGNAL NEWNYM` after a configurable number of successes or failures,
//! picking a fresh user agent each time. A rotation failure is the only error
//! a caller sees; an optional autosave hook runs just before it is returned.

pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod handler;
pub mod identity;
pub mod middleware;
pub mod proxy;
mod rotation;

pub use client::{HttpClient, ProxiedGet, ReqwestClient};
pub use config::{ControlAuth, HandlerConfig, HandlerConfigBuilder};
pub use control::{CircuitController, ControlConnection, TorController};
pub use error::{ConfigError, RotationError, TransportError};
pub use handler::RequestHandler;
pub use identity::{IdentityProvider, UserAgentPool};
pub use middleware::TorRotationMiddleware;
pub use proxy::{ProxyMap, ProxyTransport};
pub use rotation::{Checkpoint, RotationStats};
