//! Upstream reconnect state machine
//!
//! ```text
//!            dial ok                      read error / timeout / EOF
//! Connecting ───────► Streaming ─────────────────────────────────► Connecting
//!     │  ▲                                       (budget reset; sleep connect_idle
//!     │  │                                        first if nothing was received)
//!     │  └── dial failed, budget left: sleep connect_idle
//!     │
//!     └──► Stopped   (budget exhausted, or stop requested at any suspension point)
//! ```

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::fanout::Fanout;
use crate::lifecycle::{Lifecycle, Outcome, StopSignal, Terminal};
use crate::stats::RelayStats;

use super::config::ClientConfig;

/// Client state
#[derive(Debug)]
enum State {
    /// Dialing; `failures` consecutive attempts have failed so far
    Connecting { failures: u32 },
    /// Relaying one live connection
    Streaming(TcpStream),
    /// Terminal
    Stopped(Outcome),
}

/// Keeps one upstream connection alive and publishes its bytes into a [`Fanout`]
#[derive(Debug)]
pub struct UpstreamClient {
    lifecycle: Lifecycle,
    connect_addr: String,
}

impl UpstreamClient {
    /// Start the client
    ///
    /// Dial failures are counted against the retry budget rather than reported
    /// here, so starting cannot fail. The returned [`Terminal`] yields
    /// [`Error::RetryExhausted`] if the origin stays unreachable.
    pub fn start(config: ClientConfig, fanout: Fanout) -> (Self, Terminal) {
        let connect_addr = config.connect_addr.clone();
        let (lifecycle, terminal) =
            Lifecycle::spawn(move |stop| Connection::new(config, fanout, stop).run());

        (
            Self {
                lifecycle,
                connect_addr,
            },
            terminal,
        )
    }

    /// Address this client dials
    pub fn connect_addr(&self) -> &str {
        &self.connect_addr
    }

    /// Stop the client and wait until its socket is closed
    pub async fn stop(&self) {
        self.lifecycle.stop().await;
    }

    /// Whether the client has fully exited
    pub fn is_finished(&self) -> bool {
        self.lifecycle.is_finished()
    }
}

/// State owned by the running client task
struct Connection {
    config: ClientConfig,
    fanout: Fanout,
    stats: Arc<RelayStats>,
    stop: StopSignal,
    buf: BytesMut,
}

impl Connection {
    fn new(config: ClientConfig, fanout: Fanout, stop: StopSignal) -> Self {
        let stats = Arc::clone(fanout.stats());
        let buf = BytesMut::with_capacity(config.bufsize);
        Self {
            config,
            fanout,
            stats,
            stop,
            buf,
        }
    }

    async fn run(mut self) -> Outcome {
        let mut state = State::Connecting { failures: 0 };
        loop {
            state = match state {
                State::Connecting { failures } => self.connecting(failures).await,
                State::Streaming(stream) => self.streaming(stream).await,
                State::Stopped(outcome) => {
                    tracing::info!(addr = %self.config.connect_addr, "Upstream client stopped");
                    return outcome;
                }
            };
        }
    }

    async fn connecting(&mut self, failures: u32) -> State {
        if self.stop.is_stopped() {
            return State::Stopped(Outcome::Stopped);
        }

        let result = tokio::select! {
            _ = self.stop.stopped() => return State::Stopped(Outcome::Stopped),
            result = dial(&self.config) => result,
        };

        let err = match result {
            Ok(stream) => {
                self.stats.record_connect();
                tracing::info!(addr = %self.config.connect_addr, "Upstream connected");
                return State::Streaming(stream);
            }
            Err(e) => e,
        };

        self.stats.record_dial_failure();
        let failures = failures + 1;
        let max_attempts = self.config.max_attempts();

        if failures >= max_attempts {
            tracing::error!(
                addr = %self.config.connect_addr,
                attempts = failures,
                error = %err,
                "Upstream unreachable, giving up"
            );
            return State::Stopped(Outcome::Failed(Error::RetryExhausted {
                addr: self.config.connect_addr.clone(),
                attempts: failures,
                last: Box::new(err),
            }));
        }

        tracing::warn!(
            addr = %self.config.connect_addr,
            attempt = failures,
            remaining = max_attempts - failures,
            error = %err,
            "Upstream dial failed"
        );

        tokio::select! {
            _ = self.stop.stopped() => State::Stopped(Outcome::Stopped),
            _ = tokio::time::sleep(self.config.connect_idle) => State::Connecting { failures },
        }
    }

    async fn streaming(&mut self, mut stream: TcpStream) -> State {
        let mut received = 0;
        loop {
            match self.read_chunk(&mut stream).await {
                Read::Chunk(n) => {
                    let chunk = self.buf.split_to(n).freeze();
                    received += n;
                    self.stats.record_received(n);
                    self.fanout.publish(chunk);
                }
                Read::Eof => {
                    tracing::info!(addr = %self.config.connect_addr, "Upstream closed connection");
                    break;
                }
                Read::Failed(e) => {
                    tracing::warn!(
                        addr = %self.config.connect_addr,
                        error = %e,
                        "Upstream read failed, reconnecting"
                    );
                    break;
                }
                Read::Stop => return State::Stopped(Outcome::Stopped),
            }
        }
        drop(stream);

        if received > 0 {
            return State::Connecting { failures: 0 };
        }

        // An origin that accepts and closes at once is not redialed in a tight loop
        tokio::select! {
            _ = self.stop.stopped() => State::Stopped(Outcome::Stopped),
            _ = tokio::time::sleep(self.config.connect_idle) => State::Connecting { failures: 0 },
        }
    }

    /// Read up to `bufsize` bytes into the head of `buf`
    async fn read_chunk(&mut self, stream: &mut TcpStream) -> Read {
        if self.stop.is_stopped() {
            return Read::Stop;
        }

        self.buf.clear();
        self.buf.resize(self.config.bufsize, 0);

        let timeout = self.config.read_timeout;
        let read = tokio::select! {
            _ = self.stop.stopped() => return Read::Stop,
            read = tokio::time::timeout(timeout, stream.read(&mut self.buf[..])) => read,
        };

        match read {
            Ok(Ok(0)) => Read::Eof,
            Ok(Ok(n)) => Read::Chunk(n),
            Ok(Err(e)) => Read::Failed(e.into()),
            Err(_) => Read::Failed(Error::ReadTimeout(timeout)),
        }
    }
}

/// Dial `connect_addr` within `connect_timeout`
async fn dial(config: &ClientConfig) -> Result<TcpStream> {
    let connect = TcpStream::connect(config.connect_addr.as_str());
    match tokio::time::timeout(config.connect_timeout, connect).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(Error::ConnectTimeout(config.connect_timeout)),
    }
}

/// Result of one upstream read
enum Read {
    Chunk(usize),
    Eof,
    Stop,
    Failed(Error),
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};

    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::fanout::Subscription;
    use crate::testing::wait_until;

    async fn refused_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    async fn collect(sub: &mut Subscription, len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while out.len() < len {
            let chunk = tokio::time::timeout(Duration::from_secs(5), sub.recv())
                .await
                .expect("chunk arrived in time")
                .expect("subscription alive");
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_relays_bytes_in_order() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fanout = Fanout::new();
        let mut sub = fanout.subscribe();

        let config = ClientConfig::with_addr(origin.local_addr().unwrap().to_string()).bufsize(4);
        let (client, _terminal) = UpstreamClient::start(config, fanout.clone());

        let (mut socket, _) = origin.accept().await.unwrap();
        socket.write_all(b"hello, fanout").await.unwrap();

        assert_eq!(collect(&mut sub, 13).await, b"hello, fanout");
        client.stop().await;
    }

    #[tokio::test]
    async fn test_chunks_respect_bufsize() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fanout = Fanout::new();
        let mut sub = fanout.subscribe();

        let config = ClientConfig::with_addr(origin.local_addr().unwrap().to_string()).bufsize(3);
        let (client, _terminal) = UpstreamClient::start(config, fanout.clone());

        let (mut socket, _) = origin.accept().await.unwrap();
        socket.write_all(b"abcdefgh").await.unwrap();

        let mut total = 0;
        while total < 8 {
            let chunk = sub.recv().await.unwrap();
            assert!(chunk.len() <= 3);
            total += chunk.len();
        }
        client.stop().await;
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let addr = refused_addr().await;
        let fanout = Fanout::new();
        let config = ClientConfig::with_addr(addr.to_string())
            .connect_retries(3)
            .connect_idle(Duration::from_millis(50))
            .connect_timeout(Duration::from_secs(1));

        let start = Instant::now();
        let (client, mut terminal) = UpstreamClient::start(config, fanout.clone());

        let err = terminal.recv().await.expect("terminal failure");
        assert!(matches!(err, Error::RetryExhausted { attempts: 3, .. }));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(fanout.stats().snapshot().upstream_dial_failures, 3);

        client.stop().await;
        assert!(client.is_finished());
    }

    #[tokio::test]
    async fn test_successful_connect_resets_budget() {
        let addr = refused_addr().await;
        let fanout = Fanout::new();
        let stats = Arc::clone(fanout.stats());
        let config = ClientConfig::with_addr(addr.to_string())
            .connect_retries(2)
            .connect_idle(Duration::from_millis(200));

        let (client, mut terminal) = UpstreamClient::start(config, fanout.clone());

        wait_until(|| stats.snapshot().upstream_dial_failures == 1).await;

        let origin = TcpListener::bind(addr).await.unwrap();
        let (socket, _) = tokio::time::timeout(Duration::from_secs(2), origin.accept())
            .await
            .expect("client redialed")
            .unwrap();
        drop(origin);
        drop(socket);

        let err = terminal.recv().await.expect("terminal failure");
        assert!(matches!(err, Error::RetryExhausted { attempts: 2, .. }));

        let snap = stats.snapshot();
        assert_eq!(snap.upstream_connects, 1);
        assert_eq!(snap.upstream_dial_failures, 3);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_reconnects_after_read_timeout() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fanout = Fanout::new();
        let config = ClientConfig::with_addr(origin.local_addr().unwrap().to_string())
            .read_timeout(Duration::from_millis(50))
            .connect_idle(Duration::from_millis(50));

        let (client, _terminal) = UpstreamClient::start(config, fanout.clone());

        let (_first, _) = origin.accept().await.unwrap();
        let (_second, _) = tokio::time::timeout(Duration::from_secs(2), origin.accept())
            .await
            .expect("client reconnected after silent upstream")
            .unwrap();

        // accept() returns on handshake, before the client records the connect
        wait_until(|| fanout.stats().snapshot().upstream_connects >= 2).await;
        client.stop().await;
    }

    #[tokio::test]
    async fn test_empty_connection_waits_before_redial() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fanout = Fanout::new();
        let config = ClientConfig::with_addr(origin.local_addr().unwrap().to_string())
            .connect_idle(Duration::from_millis(300));

        let (client, _terminal) = UpstreamClient::start(config, fanout.clone());

        let (first, _) = origin.accept().await.unwrap();
        let closed_at = Instant::now();
        drop(first);

        let (_second, _) = tokio::time::timeout(Duration::from_secs(2), origin.accept())
            .await
            .expect("client redialed")
            .unwrap();
        assert!(closed_at.elapsed() >= Duration::from_millis(250));
        assert_eq!(fanout.stats().snapshot().upstream_dial_failures, 0);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_redial_is_immediate_after_data() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fanout = Fanout::new();
        let stats = Arc::clone(fanout.stats());
        let config = ClientConfig::with_addr(origin.local_addr().unwrap().to_string())
            .connect_idle(Duration::from_secs(60));

        let (client, _terminal) = UpstreamClient::start(config, fanout);

        let (mut first, _) = origin.accept().await.unwrap();
        first.write_all(b"live").await.unwrap();
        wait_until(|| stats.snapshot().bytes_received == 4).await;
        drop(first);

        tokio::time::timeout(Duration::from_secs(2), origin.accept())
            .await
            .expect("client redialed without waiting connect_idle")
            .unwrap();
        client.stop().await;
    }

    #[tokio::test]
    async fn test_stop_during_idle_wait_is_prompt() {
        let addr = refused_addr().await;
        let fanout = Fanout::new();
        let stats = Arc::clone(fanout.stats());
        let config = ClientConfig::with_addr(addr.to_string())
            .connect_retries(100)
            .connect_idle(Duration::from_secs(60));

        let (client, terminal) = UpstreamClient::start(config, fanout);
        wait_until(|| stats.snapshot().upstream_dial_failures == 1).await;

        tokio::time::timeout(Duration::from_secs(1), client.stop())
            .await
            .expect("stop is bounded");
        assert!(terminal.outcome().await.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_closes_upstream_socket() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fanout = Fanout::new();
        let config = ClientConfig::with_addr(origin.local_addr().unwrap().to_string());

        let (client, _terminal) = UpstreamClient::start(config, fanout);
        let (mut socket, _) = origin.accept().await.unwrap();

        client.stop().await;

        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(1), socket.read(&mut buf))
            .await
            .expect("EOF observed")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }
}
