//! Graceful, deadline-bounded shutdown.
//!
//! State machine:
//!
//! ```text
//! Running ──signal──▶ Draining ──drained──▶ WaitingOnBackgroundWork ──done──▶ Stopped
//!    │                   │                          │
//!    └─ listener error ──┴─ drain error/deadline ───┴─ background deadline ──▶ Failed
//! ```
//!
//! Ordering is strict: stop accepting, drain in-flight requests, then wait for
//! background work. Background work is never awaited when the drain fails, so a
//! stuck listener cannot also hang on stuck tasks.

use crate::config::ShutdownSettings;
use crate::error::ShutdownError;
use crate::tasks::BackgroundTasks;
use axum::Router;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info};

/// Where the coordinator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// Accepting connections.
    Running,
    /// Signal received; listener closed, in-flight requests finishing.
    Draining,
    /// Listener drained; waiting for tracked background tasks.
    WaitingOnBackgroundWork,
    /// Everything finished cleanly.
    Stopped,
    /// Shutdown could not complete cleanly; `serve` returned the cause.
    Failed,
}

impl ShutdownState {
    /// `Stopped` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ShutdownState::Stopped | ShutdownState::Failed)
    }
}

/// The process-termination signals that trigger graceful shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Interrupt => write!(f, "SIGINT"),
            TerminationSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Resolve on the first SIGINT or SIGTERM. Other signals keep their default handling.
pub async fn termination_signal() -> io::Result<TerminationSignal> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = interrupt.recv() => Ok(TerminationSignal::Interrupt),
            _ = terminate.recv() => Ok(TerminationSignal::Terminate),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(TerminationSignal::Interrupt)
    }
}

/// Drives a server from start to a terminal [`ShutdownState`].
///
/// Single use: call [`serve`](Self::serve) once.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    tasks: BackgroundTasks,
    settings: ShutdownSettings,
    state: watch::Sender<ShutdownState>,
}

impl ShutdownCoordinator {
    /// Coordinator waiting on `tasks` during shutdown.
    pub fn new(tasks: BackgroundTasks, settings: ShutdownSettings) -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self { tasks, settings, state }
    }

    /// Current state.
    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Receiver notified on every transition.
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    fn transition(&self, to: ShutdownState) {
        let from = self.state.send_replace(to);
        debug!(target: "greenlight::shutdown", from = ?from, to = ?to, "shutdown state changed");
    }

    fn fail(&self, err: ShutdownError) -> ShutdownError {
        self.transition(ShutdownState::Failed);
        error!(target: "greenlight::shutdown", error = %err, "shutdown failed");
        err
    }

    /// Serve `app` on `listener` until SIGINT or SIGTERM, then shut down gracefully.
    pub async fn serve(&self, listener: TcpListener, app: Router) -> Result<(), ShutdownError> {
        self.serve_with_signal(listener, app, termination_signal()).await
    }

    /// Like [`serve`](Self::serve), with the termination trigger supplied by the caller.
    ///
    /// `signal` is consumed once; anything it would yield afterwards is ignored.
    /// Connection peers are available to handlers as `ConnectInfo<SocketAddr>`.
    pub async fn serve_with_signal<F>(
        &self,
        listener: TcpListener,
        app: Router,
        signal: F,
    ) -> Result<(), ShutdownError>
    where
        F: Future<Output = io::Result<TerminationSignal>>,
    {
        let addr = listener.local_addr().map_err(ShutdownError::Listener)?;
        let (drain_tx, drain_rx) = oneshot::channel::<()>();
        let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                let _ = drain_rx.await;
            });
        let mut server = tokio::spawn(server.into_future());
        info!(target: "greenlight::shutdown", addr = %addr, "starting server");

        let signal = tokio::select! {
            exited = &mut server => {
                let err = match exited {
                    Ok(Ok(())) => ShutdownError::Listener(io::Error::other(
                        "listener stopped before a termination signal",
                    )),
                    Ok(Err(err)) => ShutdownError::Listener(err),
                    Err(join) => ShutdownError::ServerTask(join.to_string()),
                };
                return Err(self.fail(err));
            }
            received = signal => match received {
                Ok(signal) => signal,
                Err(err) => {
                    server.abort();
                    return Err(self.fail(ShutdownError::Signal(err)));
                }
            },
        };

        info!(
            target: "greenlight::shutdown",
            signal = %signal,
            addr = %addr,
            "shutting down server"
        );
        self.transition(ShutdownState::Draining);
        // The receiver lives inside the server future; if it is gone the server already exited.
        let _ = drain_tx.send(());

        let deadline = self.settings.drain_timeout;
        match tokio::time::timeout(deadline, &mut server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => return Err(self.fail(ShutdownError::Listener(err))),
            Ok(Err(join)) => return Err(self.fail(ShutdownError::ServerTask(join.to_string()))),
            Err(_) => {
                server.abort();
                return Err(self.fail(ShutdownError::DrainTimeout { deadline }));
            }
        }

        // No request can submit work any more; close so `wait` only sees the count fall.
        self.tasks.close();
        self.transition(ShutdownState::WaitingOnBackgroundWork);
        info!(
            target: "greenlight::shutdown",
            addr = %addr,
            in_flight = self.tasks.in_flight(),
            "completing background tasks"
        );
        match self.settings.background_timeout {
            None => self.tasks.wait().await,
            Some(deadline) => {
                if let Err(in_flight) = self.tasks.wait_timeout(deadline).await {
                    return Err(
                        self.fail(ShutdownError::BackgroundWorkTimeout { deadline, in_flight })
                    );
                }
            }
        }

        self.transition(ShutdownState::Stopped);
        info!(target: "greenlight::shutdown", addr = %addr, "stopped server");
        Ok(())
    }
}
