//! Upstream client configuration

use std::time::Duration;

/// Upstream client configuration options
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address of the origin to dial (host:port)
    pub connect_addr: String,

    /// Consecutive dial failures tolerated before giving up (at least one attempt is made)
    pub connect_retries: u32,

    /// Delay between dial attempts
    pub connect_idle: Duration,

    /// Deadline for a single dial attempt
    pub connect_timeout: Duration,

    /// Maximum size of one upstream read, and so of one published chunk
    pub bufsize: usize,

    /// Deadline for a single upstream read
    pub read_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_addr: "127.0.0.1:8000".to_string(),
            connect_retries: 5,
            connect_idle: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            bufsize: 32 * 1024, // 32KB
            read_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Create a new config dialing `addr`
    pub fn with_addr(addr: impl Into<String>) -> Self {
        Self {
            connect_addr: addr.into(),
            ..Default::default()
        }
    }

    /// Set the dial target
    pub fn connect(mut self, addr: impl Into<String>) -> Self {
        self.connect_addr = addr.into();
        self
    }

    /// Set the retry budget
    pub fn connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }

    /// Set the delay between dial attempts
    pub fn connect_idle(mut self, idle: Duration) -> Self {
        self.connect_idle = idle;
        self
    }

    /// Set the dial deadline
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read chunk size
    pub fn bufsize(mut self, size: usize) -> Self {
        self.bufsize = size;
        self
    }

    /// Set the read deadline
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Number of dial attempts made before giving up
    pub fn max_attempts(&self) -> u32 {
        self.connect_retries.max(1)
    }
}
