//! # HTTP Server
//!
//! Builds the router over shared state and serves it until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::config::HttpServerConfig;
use super::document_routes::document_routes;
use super::observability_routes::observability_routes;
use crate::observability::{Logger, MetricsRegistry, ObservationScope};
use crate::service::SyncService;
use crate::session::SessionCache;
use crate::shutdown;
use crate::sync::BlockDocument;

/// State shared by every handler
pub struct AppState {
    pub service: Arc<SyncService<BlockDocument>>,
    pub sessions: Arc<SessionCache>,
    pub metrics: Arc<MetricsRegistry>,
}

/// HTTP server for the document API
pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, state: Arc<AppState>) -> Self {
        let router = Self::build_router(&config, state);
        Self { config, router }
    }

    /// Build the combined router with all endpoints
    fn build_router(config: &HttpServerConfig, state: Arc<AppState>) -> Router {
        let cors = if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect();

            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .merge(observability_routes(state.clone()))
            .nest("/docs", document_routes(state))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors),
            )
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Serve until `shutdown` flips to true
    pub async fn start(self, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        let addr: SocketAddr = self.config.socket_addr().parse().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid socket address {}: {}", self.config.socket_addr(), e),
            )
        })?;

        let scope = ObservationScope::with_fields("HTTP_SERVER", &[("addr", &addr.to_string())]);
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                scope.fail(&e.to_string());
                return Err(e);
            }
        };
        Logger::info("HTTP_SERVER_LISTENING", &[("addr", &addr.to_string())]);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown::signalled(&mut shutdown).await })
            .await?;

        scope.complete();
        Ok(())
    }
}
