//! Plugin configuration.
//!
//! Every flag can also be set through an environment variable:
//! - `NFSCSI_DRIVER_NAME`: plugin name reported by `GetPluginInfo`.
//! - `NFSCSI_NODE_ID`: identifier of the node this instance runs on.
//! - `NFSCSI_ENDPOINT`: QUIC listen address. Defaults to `0.0.0.0:50051`.
//! - `NFSCSI_WORKING_DIR`: root under which export roots are mounted while a
//!   volume is created or deleted. Defaults to `/tmp`.
//! - `NFSCSI_TLS_CERT` / `NFSCSI_TLS_KEY`: PEM certificate chain and key.
//! - `NFSCSI_LOG_JSON`: emit logs as JSON lines.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use libnfscsi::backend::nfs::{DEFAULT_DRIVER_NAME, DEFAULT_WORKING_DIR};

#[derive(Parser, Debug, Clone)]
#[command(name = "nfscsi-plugin", version, about = "NFS CSI plugin served over QUIC")]
pub struct DriverConfig {
    #[arg(long, env = "NFSCSI_DRIVER_NAME", default_value = DEFAULT_DRIVER_NAME)]
    pub driver_name: String,

    #[arg(long, env = "NFSCSI_NODE_ID", default_value = "")]
    pub node_id: String,

    #[arg(long, env = "NFSCSI_ENDPOINT", default_value = "0.0.0.0:50051")]
    pub endpoint: SocketAddr,

    #[arg(long, env = "NFSCSI_WORKING_DIR", default_value = DEFAULT_WORKING_DIR, value_name = "DIR")]
    pub working_dir: PathBuf,

    #[arg(long, env = "NFSCSI_TLS_CERT", value_name = "FILE")]
    pub tls_cert: PathBuf,

    #[arg(long, env = "NFSCSI_TLS_KEY", value_name = "FILE")]
    pub tls_key: PathBuf,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, env = "NFSCSI_LOG_JSON")]
    pub log_json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 5] = [
        "nfscsi-plugin",
        "--tls-cert",
        "/etc/nfscsi/tls.crt",
        "--tls-key",
        "/etc/nfscsi/tls.key",
    ];

    #[test]
    fn defaults() {
        let cfg = DriverConfig::try_parse_from(REQUIRED).unwrap();
        assert_eq!(cfg.driver_name, "nfsplugin.csi.cliufreever.com");
        assert_eq!(cfg.working_dir, PathBuf::from("/tmp"));
        assert_eq!(cfg.endpoint, "0.0.0.0:50051".parse::<SocketAddr>().unwrap());
        assert!(cfg.node_id.is_empty());
        assert!(!cfg.log_json);
    }

    #[test]
    fn flags_override_defaults() {
        let mut args = REQUIRED.to_vec();
        args.extend([
            "--driver-name",
            "nfs.example.com",
            "--node-id",
            "worker-3",
            "--endpoint",
            "127.0.0.1:7443",
            "--working-dir",
            "/var/lib/nfscsi",
            "--log-json",
        ]);
        let cfg = DriverConfig::try_parse_from(args).unwrap();
        assert_eq!(cfg.driver_name, "nfs.example.com");
        assert_eq!(cfg.node_id, "worker-3");
        assert_eq!(cfg.endpoint.port(), 7443);
        assert_eq!(cfg.working_dir, PathBuf::from("/var/lib/nfscsi"));
        assert!(cfg.log_json);
    }

    #[test]
    fn rejects_bad_endpoint() {
        let mut args = REQUIRED.to_vec();
        args.extend(["--endpoint", "not-an-address"]);
        assert!(DriverConfig::try_parse_from(args).is_err());
    }
}
