use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use holoroom_common::helpers::env_bool;

/// Default configuration values
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;
pub const DEFAULT_OUTBOX_CAPACITY: usize = 128;

const ALLOW_PUBLIC_BIND_ENV: &str = "HOLOROOM_ALLOW_PUBLIC_BIND";

#[derive(Parser, Debug, Clone)]
#[command(name = "holoroom-relay")]
#[command(about = "Holoroom relay - fans out pose and signaling frames between sessions")]
pub struct RelayConfig {
    /// Listen address for HTTP/WebSocket traffic
    #[arg(long, env = "HOLOROOM_RELAY_LISTEN", default_value = "127.0.0.1:3000")]
    pub listen: SocketAddr,

    /// Directory holding the packaged client bundle
    #[arg(long, env = "HOLOROOM_STATIC_DIR", default_value = "client/dist")]
    pub static_dir: PathBuf,

    /// PEM certificate; enables TLS together with --tls-key
    #[arg(long, env = "HOLOROOM_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key; enables TLS together with --tls-cert
    #[arg(long, env = "HOLOROOM_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Largest accepted WebSocket message
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    pub max_message_bytes: usize,

    /// Frames queued per session before new ones are dropped
    #[arg(long, default_value_t = DEFAULT_OUTBOX_CAPACITY)]
    pub outbox_capacity: usize,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl RelayConfig {
    /// Certificate and key paths when TLS is configured.
    pub fn tls(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    pub fn check_public_bind_allowed(&self) -> anyhow::Result<()> {
        check_bind(self.listen, env_bool(ALLOW_PUBLIC_BIND_ENV, false))
    }
}

fn check_bind(addr: SocketAddr, allow_public: bool) -> anyhow::Result<()> {
    if addr.ip().is_loopback() || allow_public {
        return Ok(());
    }
    Err(anyhow::anyhow!(
        "refusing non-loopback bind {addr} without {ALLOW_PUBLIC_BIND_ENV}=1"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::try_parse_from(["holoroom-relay"]).unwrap();
        assert!(config.listen.ip().is_loopback());
        assert_eq!(config.listen.port(), 3000);
        assert_eq!(config.max_message_bytes, DEFAULT_MAX_MESSAGE_BYTES);
        assert!(config.tls().is_none());
    }

    #[test]
    fn test_tls_needs_both_files() {
        assert!(RelayConfig::try_parse_from(["holoroom-relay", "--tls-cert", "cert.pem"]).is_err());

        let config = RelayConfig::try_parse_from([
            "holoroom-relay",
            "--tls-cert",
            "cert.pem",
            "--tls-key",
            "key.pem",
        ])
        .unwrap();
        let (cert, key) = config.tls().unwrap();
        assert_eq!(cert, Path::new("cert.pem"));
        assert_eq!(key, Path::new("key.pem"));
    }

    #[test]
    fn test_public_bind_is_opt_in() {
        let public: SocketAddr = "0.0.0.0:3000".parse().unwrap();
        let local: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        assert!(check_bind(public, false).is_err());
        assert!(check_bind(public, true).is_ok());
        assert!(check_bind(local, false).is_ok());
    }
}
