//! Single-target reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌───────────────────────────────────────────────┐
//!                         │                 SHADOW PROXY                  │
//!                         │                                               │
//!     Client Request      │  ┌─────────┐   ┌─────────┐   ┌────────────┐   │
//!     ────────────────────┼─▶│   net   │──▶│  http   │──▶│  routing   │   │
//!                         │  │listener │   │ server  │   │  classify  │   │
//!                         │  │ + slots │   └─────────┘   └─────┬──────┘   │
//!                         │  └─────────┘                       │          │
//!                         │        ┌──────────────┬────────────┼───────┐  │
//!                         │        ▼              ▼            ▼       ▼  │
//!                         │   preflight      redirect     forward  websocket
//!                         │                                 │       bridge│
//!     Client Response     │                                 ▼         │   │
//!     ◀───────────────────┼──────────── response + CORS ◀── upstream ◀┘   │
//!                         └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use shadow_proxy::config::{self, ProxyConfig, ServerConfig, TlsConfig};
use shadow_proxy::lifecycle::signals::wait_for_shutdown_signal;
use shadow_proxy::observability::{logging, metrics};
use shadow_proxy::ProxyServer;

#[derive(Parser)]
#[command(name = "shadow-proxy")]
#[command(about = "Reverse proxy for a single upstream target", long_about = None)]
struct Cli {
    /// Base URL every request is forwarded to
    target: Option<String>,

    /// TOML configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum concurrent requests and WebSocket sessions
    #[arg(long)]
    max_conn: Option<usize>,

    /// Location for requests to "/" when redirects are enabled
    #[arg(long)]
    redirect_url: Option<String>,

    #[arg(long)]
    redirects: bool,

    #[arg(long, requires = "ssl_key")]
    ssl_cert: Option<PathBuf>,

    #[arg(long, requires = "ssl_cert")]
    ssl_key: Option<PathBuf>,

    /// Seconds to let sessions drain on shutdown
    #[arg(long)]
    shutdown_grace: Option<u64>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_address: Option<String>,

    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Overlay command-line flags on the file configuration.
    fn apply(self, mut config: ProxyConfig) -> ProxyConfig {
        if let Some(target) = self.target {
            config.upstream.target_base_url = target;
        }
        if let Some(host) = self.host {
            config.listener.host = host;
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(timeout) = self.timeout {
            config.upstream.timeout_secs = timeout;
        }
        if let Some(max_conn) = self.max_conn {
            config.listener.max_connections = max_conn;
        }
        if let Some(url) = self.redirect_url {
            config.redirect.url = Some(url);
        }
        if self.redirects {
            config.redirect.enabled = true;
        }
        if let (Some(cert), Some(key)) = (self.ssl_cert, self.ssl_key) {
            config.listener.tls = Some(TlsConfig {
                cert_path: cert.display().to_string(),
                key_path: key.display().to_string(),
            });
        }
        if let Some(grace) = self.shutdown_grace {
            config.lifecycle.shutdown_grace_secs = grace;
        }
        if let Some(addr) = self.metrics_address {
            config.observability.metrics_enabled = true;
            config.observability.metrics_address = addr;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let file_config = match &cli.config {
        Some(path) => config::loader::read_config(path)?,
        None => ProxyConfig::default(),
    };
    let config = cli.apply(file_config);

    logging::init_logging(&config.observability.log_level);
    tracing::info!("shadow-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    let server_config = ServerConfig::try_from(&config)?;

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let tls = config.listener.tls.as_ref();
    let cert = tls.map(|t| PathBuf::from(&t.cert_path));
    let key = tls.map(|t| PathBuf::from(&t.key_path));

    let mut server = ProxyServer::new(server_config)?;
    server
        .start_server(
            &config.listener.host,
            config.listener.port,
            cert.as_deref(),
            key.as_deref(),
        )
        .await?;

    wait_for_shutdown_signal().await;
    server.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
