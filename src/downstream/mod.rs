//! Downstream side of the relay
//!
//! The server accepts consumer connections and runs one independent session
//! per connection. Each session owns exactly one fanout subscription and
//! enforces its own write deadline, so a slow or dead consumer only ever
//! affects itself.

pub mod config;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use server::DownstreamServer;
pub use session::Session;
