//! Webhook HTTP(S) server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tracing::{info, warn};

use crate::webhook::{webhook_router, WebhookState};
use crate::Error;

/// Grace period for in-flight admission requests on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind the server
    pub addr: SocketAddr,
    /// TLS certificate and private key PEM files; plain HTTP when absent
    pub tls: Option<TlsFiles>,
}

/// Paths of the serving certificate and its key
#[derive(Clone, Debug)]
pub struct TlsFiles {
    /// Certificate chain PEM
    pub cert: PathBuf,
    /// Private key PEM
    pub key: PathBuf,
}

/// Serve the admission webhooks until SIGINT or SIGTERM
pub async fn start_server(config: ServerConfig, state: Arc<WebhookState>) -> Result<(), Error> {
    let app = webhook_router(state);

    let handle = Handle::new();
    tokio::spawn(shutdown_on_signal(handle.clone()));

    let served = match config.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .map_err(|e| Error::config(format!("TLS config error: {e}")))?;

            info!(addr = %config.addr, cert = %tls.cert.display(), "Starting webhook server");
            axum_server::bind_rustls(config.addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
        None => {
            warn!(addr = %config.addr, "No TLS certificate configured, serving plain HTTP");
            axum_server::bind(config.addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
    };
    served?;

    info!("Webhook server stopped");
    Ok(())
}

async fn shutdown_on_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining requests");
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}
