//! TLS error types.

use thiserror::Error;

/// Errors that can occur while preparing TLS.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Self-signed certificate could not be generated or written.
    #[error("failed to generate certificate in '{path}': {message}")]
    CertGenerationError {
        /// Certificate directory or file.
        path: String,
        /// Error message.
        message: String,
    },

    /// Certificate or key file is malformed, missing or out of its validity
    /// window.
    #[error("invalid certificate '{path}': {message}")]
    InvalidCertificate {
        /// The offending file.
        path: String,
        /// Error message.
        message: String,
    },

    /// The rustls configuration could not be built.
    #[error("configuration error: {message}")]
    ConfigError {
        /// Error message.
        message: String,
    },
}

/// Result type alias for TLS operations.
pub type TlsResult<T> = Result<T, TlsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TlsError::InvalidCertificate {
            path: "certs/server.crt".to_string(),
            message: "certificate expired".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid certificate 'certs/server.crt': certificate expired"
        );
    }
}
