//! Introspection endpoint
//!
//! A small HTTP server exposing relay statistics on a separate address.
//!
//! - `GET /healthz` returns `ok`
//! - `GET` on any other path returns the stats snapshot, one `key value` per line
//! - any other method returns `405 Method Not Allowed`
//!
//! The listener is bound before [`Introspection::start`] returns. A serve
//! failure ends the endpoint with [`Error::Introspection`], which the relay
//! treats as fatal.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use crate::error::{Error, Result};
use crate::fanout::Fanout;
use crate::lifecycle::{Lifecycle, Outcome, StopSignal, Terminal};

/// Running introspection endpoint
#[derive(Debug)]
pub struct Introspection {
    lifecycle: Lifecycle,
    local_addr: SocketAddr,
}

impl Introspection {
    /// Bind `addr` and start serving
    pub async fn start(addr: &str, fanout: Fanout) -> Result<(Self, Terminal)> {
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(addr = %local_addr, "Introspection endpoint listening");

        let (lifecycle, terminal) =
            Lifecycle::spawn(move |stop| serve(listener, router(fanout), stop));

        Ok((
            Self {
                lifecycle,
                local_addr,
            },
            terminal,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the listener and wait for in-flight requests
    pub async fn stop(&self) {
        self.lifecycle.stop().await;
    }
}

fn router(fanout: Fanout) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .fallback(stats_handler)
        .with_state(fanout)
}

async fn serve(listener: TcpListener, app: Router, stop: StopSignal) -> Outcome {
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { stop.stopped().await })
        .await;

    match served {
        Ok(()) => {
            tracing::info!("Introspection endpoint stopped");
            Outcome::Stopped
        }
        Err(e) => {
            tracing::error!(error = %e, "Introspection endpoint failed");
            Outcome::Failed(Error::Introspection(e))
        }
    }
}

async fn health_handler() -> &'static str {
    "ok\n"
}

async fn stats_handler(method: Method, State(fanout): State<Fanout>) -> Response {
    if method != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n").into_response();
    }
    render_stats(&fanout).into_response()
}

fn render_stats(fanout: &Fanout) -> String {
    format!(
        "{}subscribers {}\n",
        fanout.stats().snapshot(),
        fanout.subscriber_count()
    )
}
