//! TLS configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Certificate file name inside the certificate directory.
pub const CERT_FILE_NAME: &str = "server.crt";

/// Private key file name inside the certificate directory.
pub const KEY_FILE_NAME: &str = "server.key";

/// Configuration for server-side TLS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Directory holding `server.crt` and `server.key`.
    pub cert_dir: PathBuf,

    /// Subject alternative names for a generated certificate.
    pub hostnames: Vec<String>,

    /// Validity of a generated certificate, in days.
    pub validity_days: u32,

    /// CA bundle for client certificates. Enables mutual TLS when set.
    pub client_ca_path: Option<PathBuf>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_dir: PathBuf::from("certs"),
            hostnames: vec!["localhost".to_string(), "127.0.0.1".to_string()],
            validity_days: 365,
            client_ca_path: None,
        }
    }
}

impl TlsConfig {
    /// Create a config rooted at `cert_dir`.
    #[must_use]
    pub fn new(cert_dir: impl Into<PathBuf>) -> Self {
        Self {
            cert_dir: cert_dir.into(),
            ..Self::default()
        }
    }

    /// Require client certificates signed by the given CA bundle.
    #[must_use]
    pub fn with_client_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_ca_path = Some(path.into());
        self
    }

    /// Path of the certificate file.
    #[must_use]
    pub fn cert_path(&self) -> PathBuf {
        self.cert_dir.join(CERT_FILE_NAME)
    }

    /// Path of the private key file.
    #[must_use]
    pub fn key_path(&self) -> PathBuf {
        self.cert_dir.join(KEY_FILE_NAME)
    }

    /// Whether mutual TLS is configured.
    #[must_use]
    pub fn mtls_enabled(&self) -> bool {
        self.client_ca_path.is_some()
    }
}
