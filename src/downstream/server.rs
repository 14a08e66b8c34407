//! Downstream server listener
//!
//! Binds the listening socket, runs the accept loop and spawns one
//! [`Session`] per accepted connection.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::fanout::Fanout;
use crate::lifecycle::{Lifecycle, Outcome, StopSignal, Terminal};

use super::config::ServerConfig;
use super::session::Session;

/// Downstream server
#[derive(Debug)]
pub struct DownstreamServer {
    lifecycle: Lifecycle,
    local_addr: SocketAddr,
}

impl DownstreamServer {
    /// Bind the listener and start accepting
    ///
    /// A bind failure is returned immediately and nothing is spawned. Once this
    /// returns `Ok` the server is ready and [`local_addr`](Self::local_addr)
    /// is the resolved listening address.
    pub async fn start(config: ServerConfig, fanout: Fanout) -> Result<(Self, Terminal)> {
        let listener = TcpListener::bind(config.listen_addr.as_str())
            .await
            .map_err(|source| Error::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(addr = %local_addr, "Downstream server listening");

        let (lifecycle, terminal) = Lifecycle::spawn(move |stop| {
            AcceptLoop {
                listener,
                config,
                fanout,
                stop,
                sessions: JoinSet::new(),
                next_session_id: 1,
            }
            .run()
        });

        Ok((
            Self {
                lifecycle,
                local_addr,
            },
            terminal,
        ))
    }

    /// Resolved listening address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the listener and wait until every session has ended
    pub async fn stop(&self) {
        self.lifecycle.stop().await;
    }

    /// Whether the accept loop and all sessions have exited
    pub fn is_finished(&self) -> bool {
        self.lifecycle.is_finished()
    }
}

struct AcceptLoop {
    listener: TcpListener,
    config: ServerConfig,
    fanout: Fanout,
    stop: StopSignal,
    sessions: JoinSet<()>,
    next_session_id: u64,
}

impl AcceptLoop {
    async fn run(mut self) -> Outcome {
        let outcome = loop {
            tokio::select! {
                _ = self.stop.stopped() => break Outcome::Stopped,
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => self.spawn_session(socket, peer_addr),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                        break Outcome::Failed(Error::Accept(e));
                    }
                },
                // Reap finished sessions so the set does not grow unbounded
                Some(_) = self.sessions.join_next(), if !self.sessions.is_empty() => {}
            }
        };

        let AcceptLoop {
            listener,
            mut sessions,
            ..
        } = self;
        drop(listener);

        match outcome {
            // Session signals are children of the loop signal and wind down on their own
            Outcome::Stopped => while sessions.join_next().await.is_some() {},
            Outcome::Failed(_) => sessions.shutdown().await,
        }

        tracing::info!("Downstream server stopped");
        outcome
    }

    fn spawn_session(&mut self, socket: TcpStream, peer_addr: SocketAddr) {
        let session_id = self.next_session_id;
        self.next_session_id += 1;

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::warn!(session_id = session_id, error = %e, "Failed to configure socket");
            }
        }

        let subscription = self.fanout.subscribe();

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            subscriber = %subscription.id(),
            "New downstream session"
        );

        let session = Session::new(
            session_id,
            peer_addr,
            socket,
            subscription,
            self.config.write_timeout,
            self.fanout.stats().clone(),
            self.stop.child(),
        );

        self.sessions.spawn(async move {
            match session.run().await {
                Ok(()) => tracing::debug!(session_id = session_id, "Session stopped"),
                Err(e) => tracing::debug!(
                    session_id = session_id,
                    error = %e,
                    "Session ended"
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::stats::RelayStats;
    use crate::testing::{read_exact, read_until_closed, wait_until};

    fn local_config() -> ServerConfig {
        ServerConfig::with_addr("127.0.0.1:0")
    }

    #[tokio::test]
    async fn test_bind_failure_is_immediate() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let result = DownstreamServer::start(ServerConfig::with_addr(addr), Fanout::new()).await;

        let err = result.expect_err("address in use");
        assert!(matches!(err, Error::Bind { .. }));
        assert!(err.is_startup());
    }

    #[tokio::test]
    async fn test_session_receives_published_chunks() {
        let fanout = Fanout::new();
        let (server, _terminal) = DownstreamServer::start(local_config(), fanout.clone())
            .await
            .unwrap();

        let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
        wait_until(|| fanout.subscriber_count() == 1).await;

        fanout.publish(Bytes::from_static(b"hello "));
        fanout.publish(Bytes::from_static(b"world"));

        assert_eq!(read_exact(&mut client, 11).await, b"hello world");
        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drains_sessions_and_releases_listener() {
        let fanout = Fanout::new();
        let (server, terminal) = DownstreamServer::start(local_config(), fanout.clone())
            .await
            .unwrap();
        let addr = server.local_addr();

        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(TcpStream::connect(addr).await.unwrap());
        }
        wait_until(|| fanout.subscriber_count() == 3).await;

        server.stop().await;

        assert!(server.is_finished());
        assert_eq!(fanout.subscriber_count(), 0);
        assert_eq!(fanout.stats().snapshot().sessions_active, 0);
        for client in &mut clients {
            read_until_closed(client).await;
        }
        assert!(TcpStream::connect(addr).await.is_err());
        assert!(terminal.outcome().await.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (server, _terminal) = DownstreamServer::start(local_config(), Fanout::new())
            .await
            .unwrap();

        server.stop().await;
        server.stop().await;
        assert!(server.is_finished());
    }

    #[tokio::test]
    async fn test_slow_consumer_is_disconnected() {
        let fanout = Fanout::with_capacity(2, Arc::new(RelayStats::new()));
        let config = local_config().write_timeout(Duration::from_millis(100));
        let (server, _terminal) = DownstreamServer::start(config, fanout.clone())
            .await
            .unwrap();

        let mut stalled = TcpStream::connect(server.local_addr()).await.unwrap();
        wait_until(|| fanout.subscriber_count() == 1).await;

        let chunk = Bytes::from(vec![0x55u8; 64 * 1024]);
        wait_until(|| {
            fanout.publish(chunk.clone());
            fanout.subscriber_count() == 0
        })
        .await;

        read_until_closed(&mut stalled).await;
        wait_until(|| fanout.stats().snapshot().sessions_active == 0).await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_client_hangup_ends_only_its_session() {
        let fanout = Fanout::new();
        let (server, _terminal) = DownstreamServer::start(local_config(), fanout.clone())
            .await
            .unwrap();

        let mut keep = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut gone = TcpStream::connect(server.local_addr()).await.unwrap();
        wait_until(|| fanout.subscriber_count() == 2).await;

        gone.shutdown().await.unwrap();
        drop(gone);

        // Writes to the closed peer fail within a few chunks
        let stats = Arc::clone(fanout.stats());
        wait_until(|| {
            fanout.publish(Bytes::from_static(b"x"));
            stats.snapshot().sessions_active == 1
        })
        .await;

        fanout.publish(Bytes::from_static(b"end"));
        let received = read_until_marker(&mut keep, b"end").await;
        assert!(received.iter().all(|b| *b == b'x' || b"end".contains(b)));
        server.stop().await;
    }

    async fn read_until_marker(socket: &mut TcpStream, marker: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        while !out.ends_with(marker) {
            out.extend(read_exact(socket, 1).await);
        }
        out
    }
}
