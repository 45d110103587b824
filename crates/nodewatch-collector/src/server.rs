//! Collector server: listener, router and background tasks.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::CollectorConfig;
use crate::error::{CollectorError, CollectorResult};
use crate::ingest::IngestWriter;
use crate::monitor::LivenessMonitor;
use crate::routes::create_router;
use crate::state::CollectorState;

/// The collector: accepts agent connections, drains reports into the store
/// and serves the query API.
#[derive(Debug, Clone)]
pub struct CollectorServer {
    state: Arc<CollectorState>,
}

impl CollectorServer {
    /// Create a server with fresh state.
    #[must_use]
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            state: Arc::new(CollectorState::new(config)),
        }
    }

    /// Shared state, for embedding and tests.
    #[must_use]
    pub fn state(&self) -> Arc<CollectorState> {
        Arc::clone(&self.state)
    }

    /// Create the router without starting the server.
    pub fn router(&self) -> axum::Router {
        create_router(self.state())
    }

    /// Bind the configured address.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::BindFailed`] if the address is unavailable.
    pub async fn bind(&self) -> CollectorResult<TcpListener> {
        let addr = self.state.config().bind_addr;
        TcpListener::bind(addr)
            .await
            .map_err(|e| CollectorError::BindFailed(addr, e))
    }

    /// Bind and serve until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails or the server stops abnormally.
    pub async fn serve_with_shutdown<F>(&self, shutdown: F) -> CollectorResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind().await?;
        self.serve_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` completes.
    ///
    /// Starts the ingest writer and the liveness monitor, and stops both once
    /// the HTTP server has drained.
    ///
    /// # Errors
    ///
    /// Returns an error if the server stops abnormally.
    pub async fn serve_listener<F>(&self, listener: TcpListener, shutdown: F) -> CollectorResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener
            .local_addr()
            .map_err(|e| CollectorError::Internal(e.to_string()))?;
        info!(addr = %addr, "Collector listening");

        let cancel = CancellationToken::new();
        let writer = tokio::spawn(IngestWriter::for_state(&self.state).run(cancel.clone()));
        let monitor = tokio::spawn(LivenessMonitor::for_state(&self.state).run(cancel.clone()));

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| CollectorError::Internal(e.to_string()));

        cancel.cancel();
        for (name, task) in [("writer", writer), ("monitor", monitor)] {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "background task ended abnormally");
            }
        }

        info!("Collector shut down");
        result
    }
}
