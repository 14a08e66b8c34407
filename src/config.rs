//! Relay configuration
//!
//! All settings are fixed for the lifetime of one relay run.

use std::time::Duration;

use crate::downstream::ServerConfig;
use crate::error::{Error, Result};
use crate::fanout::DEFAULT_QUEUE_CAPACITY;
use crate::upstream::ClientConfig;

/// Complete relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upstream client settings
    pub client: ClientConfig,

    /// Downstream server settings
    pub server: ServerConfig,

    /// Per-subscriber queue capacity, in chunks
    pub queue_capacity: usize,

    /// Introspection endpoint address (None disables it)
    pub introspection_addr: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            server: ServerConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            introspection_addr: None,
        }
    }
}

impl RelayConfig {
    /// Relay from `connect_addr` to consumers on `listen_addr`
    pub fn new(connect_addr: impl Into<String>, listen_addr: impl Into<String>) -> Self {
        Self {
            client: ClientConfig::with_addr(connect_addr),
            server: ServerConfig::with_addr(listen_addr),
            ..Default::default()
        }
    }

    /// Replace the upstream client settings
    pub fn client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    /// Replace the downstream server settings
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }

    /// Set the per-subscriber queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Enable the introspection endpoint; an empty address disables it
    pub fn introspection(mut self, addr: impl Into<String>) -> Self {
        let addr = addr.into();
        self.introspection_addr = if addr.is_empty() { None } else { Some(addr) };
        self
    }

    /// Check that every setting is usable
    pub fn validate(&self) -> Result<()> {
        if self.client.connect_addr.is_empty() {
            return Err(Error::Config("connect address is empty".into()));
        }
        if self.server.listen_addr.is_empty() {
            return Err(Error::Config("listen address is empty".into()));
        }
        if self.client.bufsize == 0 {
            return Err(Error::Config("bufsize must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue capacity must be positive".into()));
        }
        for (name, value) in [
            ("connect timeout", self.client.connect_timeout),
            ("read timeout", self.client.read_timeout),
            ("write timeout", self.server.write_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }
}

/// Parse a duration written as `250ms`, `5s`, `2m` or a bare number of seconds
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || Error::Config(format!("invalid duration: {:?}", s));

    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(
            value.checked_mul(60).ok_or_else(invalid)?,
        )),
        _ => Err(invalid()),
    }
}
