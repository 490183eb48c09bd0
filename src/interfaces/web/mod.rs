mod auth;
mod handlers;
mod router;

pub use router::build_api_router;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::http::Method;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::core::auth::IdentityVerifier;
use crate::core::inventory::ClusterInventory;
use crate::core::orchestrator::Orchestrator;
use crate::core::secrets::SecretSource;
use crate::core::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub verifier: Arc<IdentityVerifier>,
    pub store: Store,
    pub secrets: Arc<dyn SecretSource>,
    pub inventory: Arc<dyn ClusterInventory>,
}

pub struct ApiServer {
    state: AppState,
    host: String,
    port: u16,
    rate_limit_per_second: u64,
    rate_limit_burst: u32,
}

impl ApiServer {
    pub fn new(state: AppState, config: &Config) -> Self {
        Self {
            state,
            host: config.api_host.clone(),
            port: config.api_port,
            rate_limit_per_second: config.rate_limit_per_second,
            rate_limit_burst: config.rate_limit_burst,
        }
    }

    /// Serve until shutdown. The rate limiter and CORS sit outside the bare
    /// router so tests can drive the routes directly.
    pub async fn serve(self) -> Result<()> {
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_second(self.rate_limit_per_second)
                .burst_size(self.rate_limit_burst)
                .finish()
                .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
        );

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);

        let app = build_api_router(self.state)
            .layer(GovernorLayer::new(governor_conf))
            .layer(cors);

        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("API server running at http://{}", addr);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}
