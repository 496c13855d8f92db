//! Certificate bootstrap and server configuration.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate, Utc};
use parking_lot::Mutex;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls_pemfile::{certs, private_key};
use tokio_rustls::rustls::crypto::{ring, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};
use x509_parser::prelude::parse_x509_certificate;

use super::config::TlsConfig;
use super::error::{TlsError, TlsResult};

/// Serializes certificate generation within the process.
static GENERATION_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Distinguishes temp files written by concurrent generators.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Outcome of [`TlsContextProvider::ensure_certificate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateStatus {
    /// Existing files were left untouched.
    Existing,
    /// A new self-signed pair was written.
    Generated,
}

/// Produces server TLS configurations from a certificate directory,
/// generating a self-signed pair on first use.
#[derive(Debug, Clone)]
pub struct TlsContextProvider {
    config: TlsConfig,
    crypto: Arc<CryptoProvider>,
}

impl TlsContextProvider {
    /// Create a provider for the given configuration.
    #[must_use]
    pub fn new(config: TlsConfig) -> Self {
        Self {
            config,
            crypto: Arc::new(ring::default_provider()),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }

    /// Make sure a certificate and key exist, generating a self-signed pair
    /// if neither does.
    ///
    /// Existing files are never modified. A directory holding only one half
    /// of the pair is an error rather than something to repair.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::CertGenerationError`] on filesystem or crypto
    /// failure, or when the pair is incomplete.
    pub fn ensure_certificate(&self) -> TlsResult<CertificateStatus> {
        let _guard = GENERATION_LOCK.lock();

        let cert_path = self.config.cert_path();
        let key_path = self.config.key_path();

        match (cert_path.exists(), key_path.exists()) {
            (true, true) => {
                debug!(cert = %cert_path.display(), "Using existing certificate");
                return Ok(CertificateStatus::Existing);
            }
            (false, false) => {}
            (cert_exists, _) => {
                let missing = if cert_exists { &key_path } else { &cert_path };
                return Err(TlsError::CertGenerationError {
                    path: missing.display().to_string(),
                    message: "certificate pair is incomplete, refusing to overwrite".to_string(),
                });
            }
        }

        let dir = &self.config.cert_dir;
        fs::create_dir_all(dir).map_err(|e| generation_error(dir, e))?;

        let (cert_pem, key_pem) = self.generate()?;

        // Key first: the certificate appearing last completes the pair.
        write_atomic(&key_path, key_pem.as_bytes(), true)?;
        write_atomic(&cert_path, cert_pem.as_bytes(), false)?;

        info!(
            cert = %cert_path.display(),
            hostnames = ?self.config.hostnames,
            validity_days = self.config.validity_days,
            "Generated self-signed certificate"
        );
        Ok(CertificateStatus::Generated)
    }

    fn generate(&self) -> TlsResult<(String, String)> {
        let dir = &self.config.cert_dir;

        let mut params = CertificateParams::new(self.config.hostnames.clone())
            .map_err(|e| generation_error(dir, e))?;

        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, self.common_name());
        name.push(DnType::OrganizationName, "NetHub");
        params.distinguished_name = name;

        let today = Utc::now().date_naive();
        let not_after = today
            .checked_add_days(Days::new(u64::from(self.config.validity_days)))
            .ok_or_else(|| generation_error(dir, "validity period out of range"))?;
        let (year, month, day) = ymd(today);
        params.not_before = rcgen::date_time_ymd(year, month, day);
        let (year, month, day) = ymd(not_after);
        params.not_after = rcgen::date_time_ymd(year, month, day);

        let key_pair = KeyPair::generate().map_err(|e| generation_error(dir, e))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| generation_error(dir, e))?;

        Ok((cert.pem(), key_pair.serialize_pem()))
    }

    fn common_name(&self) -> &str {
        self.config
            .hostnames
            .first()
            .map_or("localhost", String::as_str)
    }

    /// Load the certificate pair and build a rustls server configuration.
    ///
    /// When a client CA is configured, clients must present a certificate
    /// signed by it.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::InvalidCertificate`] if a file is unreadable,
    /// malformed, lacks a key, or the leaf certificate is outside its
    /// validity window.
    pub fn build_server_config(&self) -> TlsResult<Arc<ServerConfig>> {
        let cert_path = self.config.cert_path();
        let key_path = self.config.key_path();

        let chain = load_certificates(&cert_path)?;
        check_validity(&cert_path, &chain[0])?;
        let key = load_private_key(&key_path)?;

        let builder = ServerConfig::builder_with_provider(Arc::clone(&self.crypto))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::ConfigError {
                message: e.to_string(),
            })?;

        let builder = match &self.config.client_ca_path {
            Some(ca_path) => {
                let mut roots = RootCertStore::empty();
                for ca in load_certificates(ca_path)? {
                    roots.add(ca).map_err(|e| invalid(ca_path, e))?;
                }
                let verifier =
                    WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&self.crypto))
                        .build()
                        .map_err(|e| TlsError::ConfigError {
                            message: e.to_string(),
                        })?;
                debug!(ca = %ca_path.display(), "Client certificates required");
                builder.with_client_cert_verifier(verifier)
            }
            None => builder.with_no_client_auth(),
        };

        let config = builder
            .with_single_cert(chain, key)
            .map_err(|e| invalid(&cert_path, e))?;

        Ok(Arc::new(config))
    }

    /// Build a TLS acceptor from the current certificate pair.
    ///
    /// # Errors
    ///
    /// See [`Self::build_server_config`].
    pub fn acceptor(&self) -> TlsResult<TlsAcceptor> {
        Ok(TlsAcceptor::from(self.build_server_config()?))
    }
}

fn ymd(date: NaiveDate) -> (i32, u8, u8) {
    // Months and days from a valid date always fit in a u8.
    (date.year(), date.month() as u8, date.day() as u8)
}

fn generation_error(path: &Path, err: impl std::fmt::Display) -> TlsError {
    TlsError::CertGenerationError {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

fn invalid(path: &Path, err: impl std::fmt::Display) -> TlsError {
    TlsError::InvalidCertificate {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// Write `contents` to a sibling temp file and rename it into place.
fn write_atomic(path: &Path, contents: &[u8], private: bool) -> TlsResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let result = (|| {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        if private {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        #[cfg(not(unix))]
        let _ = private;

        let mut file = options.open(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    result.map_err(|e| {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temp file");
            }
        }
        generation_error(path, e)
    })
}

/// Load certificates from a PEM file.
fn load_certificates(path: &Path) -> TlsResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| invalid(path, e))?;
    let mut reader = BufReader::new(file);

    let certificates = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| invalid(path, e))?;

    if certificates.is_empty() {
        return Err(invalid(path, "no certificates found in file"));
    }
    Ok(certificates)
}

/// Load a private key from a PEM file.
fn load_private_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| invalid(path, e))?;
    let mut reader = BufReader::new(file);

    private_key(&mut reader)
        .map_err(|e| invalid(path, e))?
        .ok_or_else(|| invalid(path, "no private key found in file"))
}

/// Reject a leaf certificate that is expired or not yet valid.
fn check_validity(path: &Path, cert: &CertificateDer<'_>) -> TlsResult<()> {
    let (_, parsed) = parse_x509_certificate(cert.as_ref()).map_err(|e| invalid(path, e))?;
    let validity = parsed.validity();

    if !validity.is_valid() {
        return Err(invalid(
            path,
            format!(
                "certificate is outside its validity period ({} to {})",
                validity.not_before, validity.not_after
            ),
        ));
    }
    Ok(())
}
