//! TLS Module
//!
//! Certificate bootstrap and rustls server configuration. A self-signed
//! certificate is generated on first start when the certificate directory
//! is empty; operator-supplied files are never overwritten. Optional mutual
//! TLS verifies client certificates against a configured CA bundle.

mod config;
mod error;
mod provider;

pub use config::{TlsConfig, CERT_FILE_NAME, KEY_FILE_NAME};
pub use error::{TlsError, TlsResult};
pub use provider::{CertificateStatus, TlsContextProvider};
