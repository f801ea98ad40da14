mod config;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libnfscsi::NfsBackend;
use libnfscsi::transport::server::CsiServer;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::DriverConfig;

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn load_tls(cert: &Path, key: &Path) -> Result<rustls::ServerConfig> {
    let certs = CertificateDer::pem_file_iter(cert)
        .with_context(|| format!("Failed to open certificate {}", cert.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificate {}", cert.display()))?;
    let key = PrivateKeyDer::from_pem_file(key)
        .with_context(|| format!("Failed to read private key {}", key.display()))?;

    rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])
    .context("Failed to select TLS 1.3")?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .context("Invalid TLS certificate or key")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = DriverConfig::parse();
    init_logging(cfg.log_json);

    if cfg.node_id.is_empty() {
        warn!("node id is empty, NodeGetInfo will report an empty id");
    }
    info!(
        driver = %cfg.driver_name,
        node_id = %cfg.node_id,
        working_dir = %cfg.working_dir.display(),
        version = env!("CARGO_PKG_VERSION"),
        "starting NFS CSI plugin",
    );

    let tls = load_tls(&cfg.tls_cert, &cfg.tls_key)?;
    let backend = Arc::new(NfsBackend::new(
        cfg.driver_name,
        cfg.node_id,
        cfg.working_dir,
    ));
    let server = CsiServer::new(cfg.endpoint, tls, backend)
        .context("Failed to start QUIC endpoint")?;

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    tokio::select! {
        res = server.serve() => res.context("CSI server failed")?,
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = tokio::signal::ctrl_c() => info!("received Ctrl-C, shutting down"),
    }

    server.shutdown();
    server.endpoint().wait_idle().await;
    info!("NFS CSI plugin stopped");
    Ok(())
}
