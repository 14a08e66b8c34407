//! Error types
//!
//! A single error enum covers every failure the relay can observe. Transient
//! faults are absorbed by the component that owns the socket; only startup
//! failures and terminal failures ever reach the embedding caller.

use std::io;
use std::time::Duration;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for relay operations
#[derive(Debug)]
pub enum Error {
    /// Single read/write fault on one socket
    Io(io::Error),
    /// Listener could not be bound (startup failure)
    Bind { addr: String, source: io::Error },
    /// Dial attempt exceeded its deadline
    ConnectTimeout(Duration),
    /// Upstream read exceeded its deadline
    ReadTimeout(Duration),
    /// Downstream write exceeded its deadline
    WriteTimeout(Duration),
    /// Upstream unreachable after the configured number of attempts
    RetryExhausted {
        addr: String,
        attempts: u32,
        last: Box<Error>,
    },
    /// Accept loop failed
    Accept(io::Error),
    /// Subscription was terminated by the fanout (slow consumer)
    Evicted,
    /// Introspection endpoint failed
    Introspection(io::Error),
    /// Terminal failure of a named subordinate component
    Component {
        name: &'static str,
        source: Box<Error>,
    },
    /// Invalid configuration
    Config(String),
    /// A component task panicked
    Panicked(String),
}

impl Error {
    /// Whether this fault is recovered locally (reconnect, or one session ends)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ConnectTimeout(_)
                | Error::ReadTimeout(_)
                | Error::WriteTimeout(_)
                | Error::Evicted
        )
    }

    /// Whether this error happened before the component became ready
    pub fn is_startup(&self) -> bool {
        match self {
            Error::Bind { .. } | Error::Config(_) => true,
            Error::Component { source, .. } => source.is_startup(),
            _ => false,
        }
    }

    /// Label the error with the subordinate component that produced it
    pub(crate) fn in_component(self, name: &'static str) -> Self {
        Error::Component {
            name,
            source: Box::new(self),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Bind { addr, source } => write!(f, "failed to bind {}: {}", addr, source),
            Error::ConnectTimeout(d) => write!(f, "connect timed out after {:?}", d),
            Error::ReadTimeout(d) => write!(f, "read timed out after {:?}", d),
            Error::WriteTimeout(d) => write!(f, "write timed out after {:?}", d),
            Error::RetryExhausted {
                addr,
                attempts,
                last,
            } => write!(
                f,
                "upstream {} unreachable after {} attempts: {}",
                addr, attempts, last
            ),
            Error::Accept(e) => write!(f, "accept failed: {}", e),
            Error::Evicted => write!(f, "subscription evicted"),
            Error::Introspection(e) => write!(f, "introspection endpoint failed: {}", e),
            Error::Component { name, source } => write!(f, "{}: {}", name, source),
            Error::Config(msg) => write!(f, "invalid configuration: {}", msg),
            Error::Panicked(msg) => write!(f, "component panicked: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) | Error::Accept(e) | Error::Introspection(e) => Some(e),
            Error::Bind { source, .. } => Some(source),
            Error::RetryExhausted { last, .. } => Some(last.as_ref()),
            Error::Component { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
