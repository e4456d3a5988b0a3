//! Dictator - dependency admission webhook for Kubernetes workloads

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use kube::Client;
use tracing::info;

use dictator::checker::{Checker, CheckerConfig};
use dictator::cluster::KubeWorkloadLister;
use dictator::registry::{RegistryConfig, RegistryLookup};
use dictator::retry::RetryConfig;
use dictator::server::{start_server, ServerConfig, TlsFiles};
use dictator::telemetry::{init_telemetry, TelemetryConfig};
use dictator::webhook::WebhookState;
use dictator::DEFAULT_LISTEN_ADDR;

/// Dictator - enforce semantic-version dependencies between workloads
#[derive(Parser, Debug)]
#[command(name = "dictator", version, about, long_about = None)]
struct Cli {
    /// Address the webhook server listens on
    #[arg(long, env = "DICTATOR_LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    listen_addr: SocketAddr,

    /// Serving certificate PEM; plain HTTP when omitted
    #[arg(long, env = "DICTATOR_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Serving private key PEM
    #[arg(long, env = "DICTATOR_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Registry host images are normalized onto, e.g. `harbor:5000`
    ///
    /// When unset, each image is looked up in the registry it names.
    #[arg(long, env = "REGISTRY_ADDR")]
    registry_addr: Option<String>,

    /// Talk to the registry over plain HTTP
    #[arg(long, env = "REGISTRY_INSECURE")]
    registry_insecure: bool,

    /// Registry basic auth user
    #[arg(long, env = "REGISTRY_USERNAME", requires = "registry_password")]
    registry_username: Option<String>,

    /// Registry basic auth password
    #[arg(long, env = "REGISTRY_PASSWORD", hide_env_values = true)]
    registry_password: Option<String>,

    /// Timeout for each registry request in seconds
    #[arg(long, default_value = "5")]
    lookup_timeout_secs: u64,

    /// Attempts per registry or Kubernetes call before the request is denied
    #[arg(long, default_value = "3")]
    retry_attempts: u32,

    /// Log JSON lines instead of text
    #[arg(long, env = "DICTATOR_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Both ring and aws-lc-rs are linked, so rustls needs an explicit provider
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install the rustls crypto provider"))?;

    let cli = Cli::parse();

    init_telemetry(TelemetryConfig { json: cli.log_json })?;

    let retry = RetryConfig::with_max_attempts(cli.retry_attempts.max(1));

    let registry_addr = cli.registry_addr.filter(|r| !r.trim().is_empty());
    let checker = Checker::new(CheckerConfig {
        default_registry: registry_addr.clone(),
    });

    let credentials = cli
        .registry_username
        .map(|user| (user, cli.registry_password.unwrap_or_default()));
    let lookup = RegistryLookup::new(RegistryConfig {
        insecure: cli.registry_insecure,
        timeout: Duration::from_secs(cli.lookup_timeout_secs),
        credentials,
        retry: retry.clone(),
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let lister = KubeWorkloadLister::new(client, retry);

    let state = Arc::new(WebhookState::new(
        checker,
        Arc::new(lookup),
        Arc::new(lister),
    ));

    let tls = match (cli.tls_cert, cli.tls_key) {
        (Some(cert), Some(key)) => Some(TlsFiles { cert, key }),
        _ => None,
    };

    info!(
        listen_addr = %cli.listen_addr,
        registry = registry_addr.as_deref().unwrap_or("<per image>"),
        tls = tls.is_some(),
        "Starting dictator"
    );

    start_server(
        ServerConfig {
            addr: cli.listen_addr,
            tls,
        },
        state,
    )
    .await?;

    Ok(())
}
