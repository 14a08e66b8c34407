//! Start/stop contract shared by every component
//!
//! Each component (upstream client, downstream server, introspection endpoint
//! and the relay itself) runs its body as one spawned future. The future gets
//! a [`StopSignal`] and resolves to an [`Outcome`]. The caller keeps:
//!
//! - a [`Lifecycle`] handle whose [`stop`](Lifecycle::stop) is idempotent and
//!   blocks until the body (and everything it joined) has exited
//! - a [`Terminal`] receiver that yields at most one failure
//!
//! ```text
//!   Lifecycle::spawn(body)
//!        │
//!        ├── stop ──CancellationToken──► StopSignal (body, sessions, ...)
//!        ├── done ◄─CancellationToken── drop guard (set when body exits, even on panic)
//!        └── Terminal ◄─oneshot── Outcome::Failed(err) or a panic
//! ```

use std::any::Any;
use std::future::Future;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// How a component's run ended
#[derive(Debug)]
pub enum Outcome {
    /// Stopped on request
    Stopped,
    /// Ended by a terminal failure
    Failed(Error),
}

impl Outcome {
    /// Whether the run ended on request
    pub fn is_stopped(&self) -> bool {
        matches!(self, Outcome::Stopped)
    }

    /// Convert into a result, treating a requested stop as success
    pub fn into_result(self) -> crate::error::Result<()> {
        match self {
            Outcome::Stopped => Ok(()),
            Outcome::Failed(e) => Err(e),
        }
    }
}

/// Receiving side of the stop request
///
/// Cheap to clone; every task spawned by a component holds one.
#[derive(Debug, Clone)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    /// Whether stop has been requested
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once stop has been requested or the handle was dropped
    pub async fn stopped(&self) {
        self.token.cancelled().await;
    }

    /// Signal for a subordinate task, stopped whenever this one is
    pub fn child(&self) -> StopSignal {
        StopSignal {
            token: self.token.child_token(),
        }
    }
}

/// Receives the single terminal failure of a component
#[derive(Debug)]
pub struct Terminal {
    rx: Option<oneshot::Receiver<Error>>,
}

impl Terminal {
    /// Wait for the terminal failure
    ///
    /// Returns `None` when the component ended without failing. Once a value
    /// has been returned, further calls return `None` immediately.
    pub async fn recv(&mut self) -> Option<Error> {
        let rx = self.rx.as_mut()?;
        let result = rx.await.ok();
        self.rx = None;
        result
    }

    /// Wait for the run to end and fold the result into an [`Outcome`]
    pub async fn outcome(mut self) -> Outcome {
        match self.recv().await {
            Some(err) => Outcome::Failed(err),
            None => Outcome::Stopped,
        }
    }
}

/// Handle controlling one spawned component
///
/// Dropping the handle requests stop.
#[derive(Debug)]
pub struct Lifecycle {
    stop: CancellationToken,
    done: CancellationToken,
}

impl Lifecycle {
    /// Spawn `body` and return its control handle and failure receiver
    ///
    /// A panic in `body` is reported on the [`Terminal`] as [`Error::Panicked`].
    pub fn spawn<F, Fut>(body: F) -> (Self, Terminal)
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let stop = CancellationToken::new();
        let done = CancellationToken::new();
        let (err_tx, err_rx) = oneshot::channel();

        let task = tokio::spawn(body(StopSignal {
            token: stop.clone(),
        }));
        let done_guard = done.clone().drop_guard();

        tokio::spawn(async move {
            let _done = done_guard;
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => {
                    let message = panic_message(e.into_panic());
                    tracing::error!(panic = %message, "Component panicked");
                    Outcome::Failed(Error::Panicked(message))
                }
                Err(_) => Outcome::Stopped,
            };
            if let Outcome::Failed(err) = outcome {
                let _ = err_tx.send(err);
            }
        });

        (Self { stop, done }, Terminal { rx: Some(err_rx) })
    }

    /// Request stop without waiting for the drain
    pub fn signal(&self) {
        self.stop.cancel();
    }

    /// Request stop and wait until the component has fully exited
    ///
    /// Concurrent and repeated calls all return once the same drain finishes.
    pub async fn stop(&self) {
        self.signal();
        self.wait().await;
    }

    /// Wait until the component has exited, without requesting stop
    pub async fn wait(&self) {
        self.done.cancelled().await;
    }

    /// Whether the component body has exited
    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast_ref::<&'static str>() {
            Some(message) => (*message).to_string(),
            None => "unknown panic".to_string(),
        },
    }
}
