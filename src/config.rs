//! Client configuration.
//!
//! [`ClientConfig`] carries the endpoint (ip, port, domain), the transport kind and the
//! timing knobs of a client. It is built with `with_*` setters on top of
//! [`ClientConfig::default`] and checked by [`ClientConfig::validate`] before a client
//! is created, so address and method mistakes surface at configuration time rather
//! than deep inside the reconnect loop.
//!
//! # Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | transport kind | TCP |
//! | idle read timeout | 600 s |
//! | keep-alive | 0 (disabled) |
//! | acknowledgment timeout | 10 s |
use std::time::Duration;

use log::warn;
use thiserror::Error;

use crate::transport::{ResolveError, TransportKind, resolver};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_KEEP_ALIVE: u32 = 120;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid address: {0}")]
    Address(#[from] ResolveError),

    #[error("method must be TCP or UDP, not '{0}'")]
    Method(String),

    #[error("idle timeout must be positive")]
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub domain: Option<String>,
    pub kind: TransportKind,
    /// Longest a read waits for the first byte of a message.
    pub idle_timeout: Duration,
    /// TCP keep-alive idle time in seconds; 0 disables it.
    pub keep_alive: u32,
    /// How long a send waits for the peer to acknowledge every byte; zero means
    /// fire and forget.
    pub ack_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ip: None,
            port: None,
            domain: None,
            kind: TransportKind::Tcp,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            keep_alive: 0,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_kind(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_keep_alive(mut self, seconds: u32) -> Self {
        self.keep_alive = seconds;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Keep-alive idle time, if one in the supported 1-120 s range is configured.
    pub fn keep_alive_interval(&self) -> Option<Duration> {
        (1..=MAX_KEEP_ALIVE)
            .contains(&self.keep_alive)
            .then(|| Duration::from_secs(self.keep_alive.into()))
    }

    /// Checks the parts of the configuration that do not need the network.
    ///
    /// Domains are only resolved on connect; an ip literal without a domain must have a
    /// recognisable shape and come with a port.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::Timeout);
        }
        if self.keep_alive > MAX_KEEP_ALIVE {
            warn!(
                "keep-alive of {}s is outside 1-{MAX_KEEP_ALIVE}s and will not be applied",
                self.keep_alive
            );
        }

        match self.domain.as_deref().filter(|d| !d.is_empty()) {
            Some(_) => Ok(()),
            None => {
                let ip = self.ip.as_deref().ok_or(ResolveError::MissingAddress)?;
                resolver::parse_ip(ip)?;
                match self.port {
                    Some(port) if port > 0 => Ok(()),
                    _ => Err(ResolveError::MissingAddress.into()),
                }
            }
        }
    }
}
