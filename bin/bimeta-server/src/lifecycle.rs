//! Service lifecycle
//!
//! Startup order is fixed: the engine is opened before any listener is
//! bound, and closed only after both servers have stopped.

use crate::grpc::MetaService;
use crate::handler::MetaHandler;
use crate::rest;
use bimeta_common::Config;
use bimeta_proto::MetaServer;
use bimeta_store::{BidirectionalStore, EngineError, EngineHandle, EngineOptions, KvEngine};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tonic::transport::Server;
use tonic::transport::server::TcpIncoming;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// A server task that stopped with an error
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("gRPC server failed: {0}")]
    Grpc(#[from] tonic::transport::Error),
    #[error("REST server failed: {0}")]
    Rest(#[source] std::io::Error),
}

/// Error type for lifecycle steps
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("servers already started")]
    AlreadyStarted,

    #[error(transparent)]
    Serve(#[from] ServeError),
}

/// Owns the engine, the request handler and the server tasks
pub struct ServiceLifecycle {
    config: Config,
    engine: Arc<EngineHandle>,
    handler: Arc<MetaHandler>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    grpc_addr: Option<SocketAddr>,
    rest_addr: Option<SocketAddr>,
}

impl ServiceLifecycle {
    /// Spawn the engine worker and wire the handler. Nothing is opened or
    /// bound yet.
    pub fn new(config: Config) -> Result<Self, LifecycleError> {
        let engine = Arc::new(EngineHandle::new(EngineOptions {
            compaction_interval: config.engine.compaction_interval(),
        })?);
        let store = BidirectionalStore::new(Arc::clone(&engine) as Arc<dyn KvEngine>)
            .with_policy(config.engine.dual_write_policy);
        let handler = Arc::new(MetaHandler::new(store));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            engine,
            handler,
            shutdown,
            tasks: Vec::new(),
            grpc_addr: None,
            rest_addr: None,
        })
    }

    /// Bound gRPC address, available after [`start`](Self::start)
    #[must_use]
    pub const fn grpc_addr(&self) -> Option<SocketAddr> {
        self.grpc_addr
    }

    /// Bound REST address, available after [`start`](Self::start)
    #[must_use]
    pub const fn rest_addr(&self) -> Option<SocketAddr> {
        self.rest_addr
    }

    pub const fn handler(&self) -> &Arc<MetaHandler> {
        &self.handler
    }

    /// Open the engine
    pub async fn pre_start(&self) -> Result<(), LifecycleError> {
        let path = &self.config.engine.path;
        self.engine.open(path).await?;
        info!(
            "Engine ready at {} (dual write policy: {:?})",
            path.display(),
            self.config.engine.dual_write_policy
        );
        Ok(())
    }

    /// Bind both listeners and serve them. Server failures are delivered on
    /// the returned channel.
    pub async fn start(&mut self) -> Result<mpsc::Receiver<ServeError>, LifecycleError> {
        if !self.tasks.is_empty() {
            return Err(LifecycleError::AlreadyStarted);
        }

        let server = &self.config.server;
        let grpc_listener = bind(server.grpc_listen).await?;
        let rest_listener = bind(server.rest_listen).await?;
        let grpc_addr = local_addr(&grpc_listener, server.grpc_listen)?;
        let rest_addr = local_addr(&rest_listener, server.rest_listen)?;
        let observability = self.config.observability.enabled;

        let (errors_tx, errors_rx) = mpsc::channel(2);

        // gRPC
        let incoming = TcpIncoming::from_listener(grpc_listener, true, None).map_err(|e| {
            LifecycleError::Bind {
                addr: grpc_addr,
                source: std::io::Error::other(e),
            }
        })?;
        let service = MetaServer::new(MetaService::new(Arc::clone(&self.handler)));
        let signal = shutdown_signal(self.shutdown.subscribe());
        let grpc = if observability {
            spawn_server(
                Server::builder()
                    .layer(TraceLayer::new_for_grpc())
                    .layer(CatchPanicLayer::new())
                    .add_service(service)
                    .serve_with_incoming_shutdown(incoming, signal),
                errors_tx.clone(),
                ServeError::Grpc,
            )
        } else {
            spawn_server(
                Server::builder()
                    .layer(CatchPanicLayer::new())
                    .add_service(service)
                    .serve_with_incoming_shutdown(incoming, signal),
                errors_tx.clone(),
                ServeError::Grpc,
            )
        };
        self.tasks.push(grpc);
        info!("gRPC server listening on {}", grpc_addr);

        // REST
        let mut app = rest::router(Arc::clone(&self.handler), server.handler_timeout());
        if observability {
            app = app.layer(TraceLayer::new_for_http());
        }
        let signal = shutdown_signal(self.shutdown.subscribe());
        let rest = spawn_server(
            async move {
                axum::serve(rest_listener, app)
                    .with_graceful_shutdown(signal)
                    .await
            },
            errors_tx,
            ServeError::Rest,
        );
        self.tasks.push(rest);
        info!("REST server listening on {}", rest_addr);

        self.grpc_addr = Some(grpc_addr);
        self.rest_addr = Some(rest_addr);
        Ok(errors_rx)
    }

    /// Signal both servers to stop and wait for them, bounded by the
    /// configured shutdown timeout.
    pub async fn stop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        info!("Stopping servers");
        self.shutdown.send_replace(true);

        let mut tasks = std::mem::take(&mut self.tasks);
        let timeout = self.config.server.shutdown_timeout();
        let wait = futures::future::join_all(tasks.iter_mut());
        if tokio::time::timeout(timeout, wait).await.is_err() {
            warn!("Servers did not stop within {:?}, aborting", timeout);
            for task in &tasks {
                task.abort();
            }
        }
    }

    /// Close the engine. Further calls are no-ops.
    pub async fn post_stop(&self) -> Result<(), LifecycleError> {
        self.engine.close().await?;
        Ok(())
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, LifecycleError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| LifecycleError::Bind { addr, source })
}

fn local_addr(listener: &TcpListener, addr: SocketAddr) -> Result<SocketAddr, LifecycleError> {
    listener
        .local_addr()
        .map_err(|source| LifecycleError::Bind { addr, source })
}

fn shutdown_signal(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        // A closed channel also means shut down.
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// Run a server future, forwarding its failure to `errors`
fn spawn_server<F, E>(
    server: F,
    errors: mpsc::Sender<ServeError>,
    wrap: fn(E) -> ServeError,
) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = server.await {
            let err = wrap(e);
            error!("{}", err);
            let _ = errors.send(err).await;
        }
    })
}

/// Run the service until ctrl-c or the first server failure
pub async fn run(config: Config) -> Result<(), LifecycleError> {
    let mut lifecycle = ServiceLifecycle::new(config)?;
    lifecycle.pre_start().await?;

    let mut errors = match lifecycle.start().await {
        Ok(errors) => errors,
        Err(e) => {
            lifecycle.post_stop().await?;
            return Err(e);
        }
    };

    let failure = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            None
        }
        err = errors.recv() => err,
    };

    lifecycle.stop().await;
    lifecycle.post_stop().await?;
    info!("bimeta shut down gracefully");

    failure.map_or(Ok(()), |e| Err(e.into()))
}
