use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sisyphi_server::config::{MatchConfig, ServerConfig};
use sisyphi_server::map_gen::{provider_from_env, MapProvider};
use sisyphi_server::metrics::{self, Metrics};
use sisyphi_server::net::match_server::{run_match_loop, MatchServer, SessionRouter};
use sisyphi_server::net::transport::WebTransportServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Sisyphi Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;
    let match_config = MatchConfig::load_or_default();
    match_config.validate().map_err(anyhow::Error::msg)?;
    info!(
        "Configuration loaded: {}:{}, sessions {}-{}, {} Hz",
        config.bind_address, config.port, config.min_sessions, config.max_sessions, match_config.tick_rate
    );

    let metrics = Arc::new(Metrics::new());
    if config.metrics_port != 0 {
        let metrics_clone = metrics.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(metrics_clone, port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let provider: Arc<dyn MapProvider> = Arc::from(provider_from_env());
    info!("Map provider: {}", provider.name());

    let match_server = Arc::new(RwLock::new(MatchServer::new(&config, match_config)));
    let router = Arc::new(SessionRouter::new());

    let server = WebTransportServer::new(config.clone(), match_server.clone(), router.clone(), metrics.clone()).await?;
    info!("Server ready on https://{}", server.bind_addr());
    info!("Certificate hash: {}", server.cert_hash());

    let match_loop = run_match_loop(match_server, router, provider, metrics);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = match_loop => {
            info!("Match over");
            // Let connection writers flush the final GameOver
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    info!("Server stopped");
    Ok(())
}
