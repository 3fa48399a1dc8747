//! HTTP server lifecycle: bind, serve in a task, bounded graceful shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{Instrument, info};

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serving loop failed: {0}")]
    Io(#[source] std::io::Error),

    #[error("serving loop exited without a shutdown request")]
    UnexpectedExit,

    #[error("serving task failed: {0}")]
    Join(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("graceful shutdown did not finish within {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Serve(#[from] ServeError),
}

/// Future returned by a [`StartServer`].
pub type StartFuture = Pin<Box<dyn Future<Output = Result<ServerHandle, ServeError>> + Send>>;

/// How the bootstrap turns a listen address and a router into a running server.
pub type StartServer = Arc<dyn Fn(String, Router) -> StartFuture + Send + Sync>;

/// [`ServerHandle::start`] as a [`StartServer`].
pub fn bind_and_serve() -> StartServer {
    Arc::new(|addr: String, router: Router| -> StartFuture {
        Box::pin(async move { ServerHandle::start(&addr, router).await })
    })
}

/// A running HTTP server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl ServerHandle {
    /// Bind `addr` (`host:port`, host names allowed) and start serving
    /// `router` on a spawned task.
    pub async fn start(addr: &str, router: Router) -> Result<Self, ServeError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| ServeError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Self::from_listener(listener, router)
    }

    pub fn from_listener(listener: TcpListener, router: Router) -> Result<Self, ServeError> {
        let local_addr = listener.local_addr().map_err(ServeError::Io)?;
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone().cancelled_owned();

        let task = tokio::spawn(
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown)
                    .await
            }
            .in_current_span()
            .with_current_subscriber(),
        );

        info!(addr = %local_addr, "http server listening");

        Ok(Self::from_task(local_addr, cancel, task))
    }

    /// Wrap an already-spawned serving task that stops when `cancel` fires.
    pub fn from_task(local_addr: SocketAddr, cancel: CancellationToken, task: JoinHandle<std::io::Result<()>>) -> Self {
        Self {
            local_addr,
            cancel,
            task: Some(task),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolves if the serving loop ends on its own.
    ///
    /// Cancel-safe. Once it has resolved, later calls never resolve.
    pub async fn failed(&mut self) -> ServeError {
        let Some(task) = self.task.as_mut() else {
            return std::future::pending().await;
        };

        let result = task.await;
        self.task = None;

        match result {
            Ok(Ok(())) => ServeError::UnexpectedExit,
            Ok(Err(e)) => ServeError::Io(e),
            Err(e) => ServeError::Join(e.to_string()),
        }
    }

    /// Stop accepting, drain in-flight requests, and wait at most `timeout`.
    ///
    /// On timeout the serving task is aborted.
    pub async fn shutdown(mut self, timeout: Duration) -> Result<(), ShutdownError> {
        self.cancel.cancel();

        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(()))) => {
                info!("http server stopped");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(ServeError::Io(e).into()),
            Ok(Err(e)) => Err(ServeError::Join(e.to_string()).into()),
            Err(_) => {
                task.abort();
                Err(ShutdownError::TimedOut(timeout))
            }
        }
    }
}
