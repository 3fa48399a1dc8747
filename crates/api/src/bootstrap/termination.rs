//! What ends a serving process.

use std::future::Future;

use grainlify_infra::RunningWorker;
use grainlify_infra::jobs::WorkerError;
use tracing::error;

use crate::server::ServeError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGINT / Ctrl-C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Interrupt => "interrupt",
            SignalKind::Terminate => "terminate",
        }
    }
}

/// The event that triggered shutdown. Exactly one per run.
#[derive(Debug)]
pub enum TerminationSignal {
    Os(SignalKind),
    ServerFailed(ServeError),
    WorkerExited(Result<(), WorkerError>),
}

impl TerminationSignal {
    pub fn describe(&self) -> &'static str {
        match self {
            TerminationSignal::Os(kind) => kind.as_str(),
            TerminationSignal::ServerFailed(_) => "server_failed",
            TerminationSignal::WorkerExited(Ok(())) => "worker_finished",
            TerminationSignal::WorkerExited(Err(_)) => "worker_failed",
        }
    }
}

/// First of the three wins; the others are dropped.
///
/// All three futures must be cancel-safe.
pub async fn race<S, F, W>(signal: S, server_failed: F, worker_exited: W) -> TerminationSignal
where
    S: Future<Output = SignalKind>,
    F: Future<Output = ServeError>,
    W: Future<Output = Result<(), WorkerError>>,
{
    tokio::select! {
        biased;

        kind = signal => TerminationSignal::Os(kind),
        err = server_failed => TerminationSignal::ServerFailed(err),
        result = worker_exited => TerminationSignal::WorkerExited(result),
    }
}

/// The worker's completion, or never when no worker runs.
pub async fn worker_exit(worker: Option<&mut RunningWorker>) -> Result<(), WorkerError> {
    match worker {
        Some(worker) => worker.completed().await,
        None => std::future::pending().await,
    }
}

/// Wait for SIGINT or SIGTERM (Ctrl-C only off unix).
///
/// A handler that fails to install is logged and never fires.
pub async fn os_signal() -> SignalKind {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => SignalKind::Interrupt,
            Err(e) => {
                error!(error = %e, "failed to install Ctrl-C handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind as UnixSignal, signal};

        match signal(UnixSignal::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                SignalKind::Terminate
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<SignalKind>();

    tokio::select! {
        kind = interrupt => kind,
        kind = terminate => kind,
    }
}
