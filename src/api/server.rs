//! API Server
//!
//! HTTP and WebSocket listener for the betting service, plus the background
//! sweeper that shares its lifetime.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::{config::BetgammonConfig, services::BettingService, sweeper};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

pub struct ApiServer {
    config: BetgammonConfig,
}

impl ApiServer {
    pub fn new(config: BetgammonConfig) -> Self {
        Self { config }
    }

    /// Start the API server and run until a shutdown signal arrives
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        // A subscriber may already be installed by an embedding binary or test
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| self.config.logging.filter.clone().into()),
            )
            .try_init();

        info!("🚀 Starting Betgammon Server");

        let service = Arc::new(BettingService::from_config(self.config.clone())?);
        let sweeper = sweeper::spawn(Arc::clone(&service), self.config.matching.sweep_interval());

        let app = build_app(Arc::new(AppState::new(service)), &self.config);
        let addr = self.socket_addr()?;
        self.log_server_info(addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("✅ Server running on http://{}", addr);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        sweeper.abort();
        served?;
        info!("🛑 Server stopped gracefully");
        Ok(())
    }

    fn socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.server.host.parse::<std::net::IpAddr>()?,
            self.config.server.port,
        )))
    }

    fn log_server_info(&self, addr: SocketAddr) {
        let config = &self.config;
        info!("📋 Server Configuration:");
        info!("   Listen: {}", addr);
        info!("   CORS: {:?}", config.server.allowed_origins);
        info!("   Request timeout: {}s", config.server.request_timeout_secs);
        info!("   Starting balance: {}", config.ledger.starting_balance);
        info!("   Max queue wait: {}s", config.matching.max_wait_secs);
        info!("   Session timeout: {}s", config.sessions.session_timeout_secs);
        if config.server.callback_api_key.is_none() {
            info!("   Callback API key: not set, adjudication routes are open");
        }
    }
}

/// Router with the full middleware stack
pub fn build_app(state: Arc<AppState>, config: &BetgammonConfig) -> axum::Router {
    create_router(state)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(create_cors_layer(config.server.allowed_origins.clone()))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
