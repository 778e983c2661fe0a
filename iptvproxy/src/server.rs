//! Server lifecycle management
//!
//! Binds the HTTP listener and, when a certificate is configured, the HTTPS
//! listener. Both serve the router until SIGINT or SIGTERM, then recording
//! workers are stopped and the database is closed.

use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use iptvproxy_api::{create_router, create_tls_router};
use iptvproxy_core::{bootstrap::Services, config::TlsFiles, Config};

/// Time given to open HTTPS connections once shutdown starts
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct IptvProxyServer {
    config: Config,
    services: Services,
}

impl IptvProxyServer {
    pub const fn new(config: Config, services: Services) -> Self {
        Self { config, services }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let result = self.serve().await;
        if let Err(e) = &result {
            error!("HTTP server error: {}", e);
        }
        self.shutdown().await;
        result
    }

    async fn serve(&self) -> anyhow::Result<()> {
        let http_addr = parse_address(&self.config.http_address())?;
        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;
        info!("HTTP server listening on {}", http_addr);

        let tls = match (self.config.https_address(), self.config.server.tls_files()) {
            (Some(address), Some(files)) => Some((parse_address(&address)?, load_tls(files).await?)),
            _ => None,
        };

        let shutdown = CancellationToken::new();
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                shutdown_signal().await;
                shutdown.cancel();
            }
        });

        let router = create_router(self.services.clone(), &self.config.server);
        let http = {
            let shutdown = shutdown.clone();
            async move {
                axum::serve(
                    listener,
                    router.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
                .map_err(anyhow::Error::from)
            }
        };

        let tls_router = create_tls_router(self.services.clone(), &self.config.server);
        let https = {
            let shutdown = shutdown.clone();
            async move {
                let Some((https_addr, tls_config)) = tls else {
                    return Ok(());
                };
                let handle = axum_server::Handle::new();
                tokio::spawn({
                    let handle = handle.clone();
                    let shutdown = shutdown.clone();
                    async move {
                        shutdown.cancelled().await;
                        handle.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
                    }
                });

                info!("HTTPS server listening on {}", https_addr);
                let result = axum_server::bind_rustls(https_addr, tls_config)
                    .handle(handle)
                    .serve(tls_router.into_make_service_with_connect_info::<SocketAddr>())
                    .await
                    .map_err(|e| anyhow::anyhow!("HTTPS server on {https_addr} failed: {e}"));
                // A failed HTTPS listener takes the plaintext one down with it.
                shutdown.cancel();
                result
            }
        };

        tokio::try_join!(http, https)?;
        info!("HTTP server shut down gracefully");
        Ok(())
    }

    async fn shutdown(&self) {
        info!("Shutting down IPTVProxy...");
        let live = self.services.recorder.live_worker_count();
        if live > 0 {
            info!("Stopping {} live recordings", live);
        }
        self.services.shutdown().await;
    }
}

fn parse_address(address: &str) -> anyhow::Result<SocketAddr> {
    address
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address '{address}': {e}"))
}

async fn load_tls(files: TlsFiles<'_>) -> anyhow::Result<RustlsConfig> {
    // sqlx and reqwest pull in different rustls backends; pin one process-wide.
    if rustls::crypto::aws_lc_rs::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }

    RustlsConfig::from_pem_file(files.certificate, files.private_key)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to load TLS certificate {} and key {}: {e}",
                files.certificate,
                files.private_key
            )
        })
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
