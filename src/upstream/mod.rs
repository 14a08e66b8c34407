//! Upstream side of the relay
//!
//! A single client dials the origin, reads its byte stream in chunks of at
//! most `bufsize` and publishes every chunk into the fanout. Transient
//! failures lead back to dialing; only an exhausted retry budget is terminal.

pub mod client;
pub mod config;

pub use client::UpstreamClient;
pub use config::ClientConfig;
