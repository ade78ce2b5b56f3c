use thiserror::Error;

/// Errors surfaced to callers of the trust validation engine.
///
/// `Configuration` is fatal and must not be retried; every other variant is scoped to the
/// request that produced it and is mapped by the gateway to a request-level rejection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrustError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("TPP validation failed: {0}")]
    Validation(String),

    #[error("Certificate content error: {0}")]
    CertificateContent(String),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),
}

impl TrustError {
    /// Whether the error comes from static configuration rather than from the request.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<config::ConfigError> for TrustError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrustError>;

/// Failure of a single revocation validator.
///
/// These are recovered inside the revocation chain and never reach its caller.
#[derive(Error, Debug)]
pub enum CertificateValidationError {
    #[error("No {0} endpoint available for certificate")]
    MissingEndpoint(&'static str),

    #[error("HTTP client setup failed: {0}")]
    Client(String),

    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Retry budget is zero; no request was attempted")]
    NoAttempts,

    #[error("Malformed OCSP response: {0}")]
    MalformedOcspResponse(String),

    #[error("OCSP responder returned status {0}")]
    OcspStatus(String),

    #[error("Malformed CRL: {0}")]
    MalformedCrl(String),

    #[error("Signature verification failed: {0}")]
    Signature(String),

    #[error("Revocation data is stale: {0}")]
    Stale(String),

    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl From<der::Error> for CertificateValidationError {
    fn from(err: der::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_der_errors_become_encoding_errors() {
        let err = CertificateValidationError::from(der::Error::from(der::ErrorKind::Failed));
        assert!(matches!(err, CertificateValidationError::Encoding(_)));
        assert!(err.to_string().starts_with("Encoding error: "));
    }

    #[test]
    fn test_configuration_errors_are_flagged() {
        assert!(TrustError::Configuration("missing".to_string()).is_configuration());
        assert!(!TrustError::Validation("denied".to_string()).is_configuration());
    }
}
