//! Network module with deferred startup.
//!
//! `new()` allocates shared state, `start()` binds the listener, and
//! `serve()` accepts connections until the shutdown future resolves. The
//! bound port is known between `start()` and `serve()`, which is what tests
//! and clients of an OS-assigned port need.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::ServerConfig;
use super::health::{health_handler, liveness_handler, readiness_handler, ProbeState};
use super::middleware::layer_router;
use super::shutdown::ShutdownController;
use crate::adapter::RequestAdapter;
use crate::routing::RouteRegistry;

/// Serves a [`RouteRegistry`] over HTTP.
pub struct NetworkModule {
    config: ServerConfig,
    listener: Option<TcpListener>,
    adapter: RequestAdapter,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Module serving `registry`. Nothing is bound until [`start`](Self::start).
    #[must_use]
    pub fn new(config: ServerConfig, registry: RouteRegistry) -> Self {
        let shutdown = Arc::new(ShutdownController::new());
        let adapter = RequestAdapter::new(registry).with_shutdown(Arc::clone(&shutdown));
        Self {
            config,
            listener: None,
            adapter,
            shutdown,
        }
    }

    /// Controller shared with the adapter and probes.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Probe routes under `/health`, everything else to the adapter.
    ///
    /// Probes are matched before registered actions, so an action at
    /// `/health` is unreachable.
    pub fn build_router(&self) -> Router {
        let probes = ProbeState {
            shutdown: Arc::clone(&self.shutdown),
            routes: self.adapter.registry().len(),
            start_time: Instant::now(),
        };

        let router = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .with_state(probes);
        layer_router(router, self.adapter.clone(), &self.config)
    }

    /// Binds the listener and returns the bound port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let port = listener.local_addr()?.port();

        info!(
            host = %self.config.host,
            port,
            routes = self.adapter.registry().len(),
            "listener bound"
        );

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then waits for in-flight action
    /// requests to finish within the configured drain timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .context("start() must be called before serve()")?;
        let router = self.build_router();
        let controller = Arc::clone(&self.shutdown);

        controller.set_ready();
        info!("serving actions");

        let signal_ctrl = Arc::clone(&controller);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("shutdown signalled, draining");
                signal_ctrl.trigger_shutdown();
            })
            .await?;

        // A shutdown that was not triggered by the signal future still drains.
        controller.trigger_shutdown();
        if controller.wait_for_drain(self.config.drain_timeout()).await {
            info!("all requests drained");
        } else {
            warn!(
                in_flight = controller.in_flight_count(),
                "drain timeout expired with requests in flight"
            );
        }
        Ok(())
    }
}
