//! Per-consumer relay session
//!
//! A session drains exactly one subscription into one socket. It ends on a
//! write error, a write timeout, eviction by the fanout, or stop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::fanout::Subscription;
use crate::lifecycle::StopSignal;
use crate::stats::RelayStats;

/// One accepted downstream connection
pub struct Session {
    id: u64,
    peer_addr: SocketAddr,
    socket: TcpStream,
    subscription: Subscription,
    write_timeout: Duration,
    stats: Arc<RelayStats>,
    stop: StopSignal,
}

impl Session {
    pub(crate) fn new(
        id: u64,
        peer_addr: SocketAddr,
        socket: TcpStream,
        subscription: Subscription,
        write_timeout: Duration,
        stats: Arc<RelayStats>,
        stop: StopSignal,
    ) -> Self {
        Self {
            id,
            peer_addr,
            socket,
            subscription,
            write_timeout,
            stats,
            stop,
        }
    }

    /// Relay until the session ends
    ///
    /// `Ok(())` means the server is stopping; any error ended the session early.
    /// Either way the subscription is dropped and the socket closed on return.
    pub async fn run(mut self) -> Result<()> {
        let _active = self.stats.session_opened();
        let result = self.relay().await;

        let _ = self.socket.shutdown().await;
        result
    }

    async fn relay(&mut self) -> Result<()> {
        loop {
            if self.stop.is_stopped() {
                return Ok(());
            }

            let chunk = tokio::select! {
                _ = self.stop.stopped() => return Ok(()),
                chunk = self.subscription.recv() => chunk.ok_or(Error::Evicted)?,
            };

            let write = tokio::select! {
                _ = self.stop.stopped() => return Ok(()),
                write = tokio::time::timeout(self.write_timeout, self.socket.write_all(&chunk)) => write,
            };

            match write {
                Ok(Ok(())) => self.stats.record_sent(chunk.len()),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(Error::WriteTimeout(self.write_timeout)),
            }
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}
