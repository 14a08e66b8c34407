//! Top-level supervisor
//!
//! Composes the introspection endpoint, the upstream client and the downstream
//! server around one shared [`Fanout`], all under the same start/stop contract.
//!
//! Startup order is introspection, client, server. If a later step fails, the
//! components already started are stopped before the error is returned. Once
//! running, the first of {stop request, introspection failure, client failure,
//! server failure} is the relay's terminal outcome, and every subordinate is
//! stopped whichever path triggered it. The relay never restarts itself.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::RelayConfig;
use crate::downstream::DownstreamServer;
use crate::error::{Error, Result};
use crate::fanout::Fanout;
use crate::introspection::Introspection;
use crate::lifecycle::{Lifecycle, Outcome, StopSignal, Terminal};
use crate::stats::{RelayStats, StatsSnapshot};
use crate::upstream::UpstreamClient;

/// A running relay
#[derive(Debug)]
pub struct Relay {
    lifecycle: Lifecycle,
    fanout: Fanout,
    local_addr: SocketAddr,
    introspection_addr: Option<SocketAddr>,
}

impl Relay {
    /// Start every component and wait until the downstream server is ready
    pub async fn start(config: RelayConfig) -> Result<(Self, Terminal)> {
        config.validate()?;

        let stats = Arc::new(RelayStats::new());
        let fanout = Fanout::with_capacity(config.queue_capacity, stats);

        let introspection = match config.introspection_addr.as_deref() {
            Some(addr) => Some(
                Introspection::start(addr, fanout.clone())
                    .await
                    .map_err(|e| e.in_component("introspection"))?,
            ),
            None => None,
        };

        let client = UpstreamClient::start(config.client.clone(), fanout.clone());

        let server = match DownstreamServer::start(config.server.clone(), fanout.clone()).await {
            Ok(server) => server,
            Err(e) => {
                tracing::error!(error = %e, "Downstream server failed to start");
                client.0.stop().await;
                if let Some((endpoint, _)) = &introspection {
                    endpoint.stop().await;
                }
                return Err(e.in_component("server"));
            }
        };

        let local_addr = server.0.local_addr();
        let introspection_addr = introspection.as_ref().map(|(e, _)| e.local_addr());

        tracing::info!(
            upstream = %config.client.connect_addr,
            downstream = %local_addr,
            introspection = ?introspection_addr,
            "Relay started"
        );

        let components = Components {
            client,
            server,
            introspection,
        };
        let (lifecycle, terminal) = Lifecycle::spawn(move |stop| components.supervise(stop));

        Ok((
            Self {
                lifecycle,
                fanout,
                local_addr,
                introspection_addr,
            },
            terminal,
        ))
    }

    /// Address downstream consumers connect to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address of the introspection endpoint, if enabled
    pub fn introspection_addr(&self) -> Option<SocketAddr> {
        self.introspection_addr
    }

    /// Current relay statistics
    pub fn stats(&self) -> StatsSnapshot {
        self.fanout.stats().snapshot()
    }

    /// Number of consumers currently subscribed
    pub fn subscriber_count(&self) -> usize {
        self.fanout.subscriber_count()
    }

    /// Stop every component and wait until all of them have exited
    pub async fn stop(&self) {
        self.lifecycle.stop().await;
    }

    /// Wait until the relay has exited on its own or by [`stop`](Self::stop)
    pub async fn wait(&self) {
        self.lifecycle.wait().await;
    }

    /// Whether every component has exited
    pub fn is_finished(&self) -> bool {
        self.lifecycle.is_finished()
    }
}

/// Subordinates owned by the supervising task
struct Components {
    client: (UpstreamClient, Terminal),
    server: (DownstreamServer, Terminal),
    introspection: Option<(Introspection, Terminal)>,
}

impl Components {
    async fn supervise(self, stop: StopSignal) -> Outcome {
        let Components {
            client: (client, mut client_errs),
            server: (server, mut server_errs),
            introspection,
        } = self;
        let (introspection, mut introspection_errs) = match introspection {
            Some((endpoint, errs)) => (Some(endpoint), Some(errs)),
            None => (None, None),
        };

        let outcome = tokio::select! {
            _ = stop.stopped() => Outcome::Stopped,
            Some(e) = recv_optional(&mut introspection_errs) => {
                Outcome::Failed(e.in_component("introspection"))
            }
            Some(e) = client_errs.recv() => Outcome::Failed(e.in_component("client")),
            Some(e) = server_errs.recv() => Outcome::Failed(e.in_component("server")),
        };

        match &outcome {
            Outcome::Stopped => tracing::info!("Relay stopping"),
            Outcome::Failed(e) => tracing::error!(error = %e, "Relay failed, stopping"),
        }

        server.stop().await;
        client.stop().await;
        if let Some(endpoint) = introspection {
            endpoint.stop().await;
        }

        tracing::info!("Relay stopped");
        outcome
    }
}

/// Wait on an optional terminal; a disabled component never fails
async fn recv_optional(terminal: &mut Option<Terminal>) -> Option<Error> {
    match terminal {
        Some(terminal) => terminal.recv().await,
        None => std::future::pending().await,
    }
}
