//! # tcp-fanout
//!
//! Relays one live byte stream from an upstream TCP source to any number of
//! downstream TCP consumers. Every consumer receives an identical copy of the
//! bytes published after it connected; a consumer that cannot keep up is
//! disconnected instead of slowing anybody else down.
//!
//! ```text
//!  origin ──TCP──► UpstreamClient ──publish──► Fanout ──┬──► Session ──TCP──► consumer
//!                  (reconnects)                         ├──► Session ──TCP──► consumer
//!                                                       └──► Session ──TCP──► consumer
//!                                                         (DownstreamServer)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use tcp_fanout::{Relay, RelayConfig};
//!
//! # async fn example() -> tcp_fanout::Result<()> {
//! let config = RelayConfig::new("origin.local:7000", "0.0.0.0:9000");
//! let (relay, mut terminal) = Relay::start(config).await?;
//!
//! tokio::select! {
//!     Some(err) = terminal.recv() => return Err(err),
//!     _ = tokio::signal::ctrl_c() => relay.stop().await,
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod downstream;
pub mod error;
pub mod fanout;
pub mod introspection;
pub mod lifecycle;
pub mod relay;
pub mod stats;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

pub use config::RelayConfig;
pub use downstream::{DownstreamServer, ServerConfig};
pub use error::{Error, Result};
pub use fanout::{Fanout, Subscription};
pub use lifecycle::{Lifecycle, Outcome, StopSignal, Terminal};
pub use relay::Relay;
pub use stats::{RelayStats, StatsSnapshot};
pub use upstream::{ClientConfig, UpstreamClient};
