//! Certificate revocation checking
//!
//! A revocation check runs the configured validators in ascending priority order:
//! - OCSP (RFC 6960): low latency, queried first by convention
//! - CRL (RFC 5280): fallback when OCSP is inconclusive or unreachable
//!
//! Validator failures never leave this module; the chain downgrades them to
//! `RevocationStatus::Unknown` and moves on.

pub mod chain;
pub mod crl;
pub mod ocsp;
pub mod transport;

pub use chain::RevocationValidatorChain;
pub use crl::CrlValidator;
pub use ocsp::OcspValidator;
pub use transport::RevocationTransport;

use crate::certificate::Certificate;
use crate::config::{RevocationConfig, ValidatorSettings};
use crate::error::CertificateValidationError;
use crate::models::{RevocationStatus, RevocationValidatorType};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Timeouts applied by the legacy retry-only entry point
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_CONNECTION_REQUEST_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 5000;

/// Network budget for one validator call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevocationBudget {
    /// Number of attempts made against each endpoint
    pub retry_count: u32,
    pub connect_timeout: Duration,
    pub connection_request_timeout: Duration,
    pub socket_timeout: Duration,
}

impl RevocationBudget {
    pub fn new(
        retry_count: u32,
        connect_timeout_ms: u64,
        connection_request_timeout_ms: u64,
        socket_timeout_ms: u64,
    ) -> Self {
        Self {
            retry_count,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            connection_request_timeout: Duration::from_millis(connection_request_timeout_ms),
            socket_timeout: Duration::from_millis(socket_timeout_ms),
        }
    }

    pub fn with_default_timeouts(retry_count: u32) -> Self {
        Self::new(
            retry_count,
            DEFAULT_CONNECT_TIMEOUT_MS,
            DEFAULT_CONNECTION_REQUEST_TIMEOUT_MS,
            DEFAULT_SOCKET_TIMEOUT_MS,
        )
    }

    /// Hard deadline for a single attempt
    pub fn attempt_timeout(&self) -> Duration {
        self.connect_timeout
            .saturating_add(self.connection_request_timeout)
            .saturating_add(self.socket_timeout)
    }

    /// Upper bound on the time one validator call can take
    pub fn worst_case(&self) -> Duration {
        self.attempt_timeout().saturating_mul(self.retry_count)
    }
}

impl From<&ValidatorSettings> for RevocationBudget {
    fn from(settings: &ValidatorSettings) -> Self {
        Self::new(
            settings.retry_count,
            settings.connect_timeout_ms,
            settings.connection_request_timeout_ms,
            settings.socket_timeout_ms,
        )
    }
}

/// Check a `thisUpdate`/`nextUpdate` window (unix seconds) against `now`, allowing `skew` either way.
pub(crate) fn check_freshness(
    this_update: i64,
    next_update: Option<i64>,
    now: i64,
    skew: Duration,
) -> Result<(), CertificateValidationError> {
    let skew = i64::try_from(skew.as_secs()).unwrap_or(i64::MAX);
    if this_update > now.saturating_add(skew) {
        return Err(CertificateValidationError::Stale(format!(
            "thisUpdate {} is in the future",
            this_update
        )));
    }
    if let Some(next_update) = next_update {
        if next_update.saturating_add(skew) < now {
            return Err(CertificateValidationError::Stale(format!(
                "nextUpdate {} has passed",
                next_update
            )));
        }
    }
    Ok(())
}

/// One network-backed revocation strategy
#[async_trait]
pub trait RevocationValidator: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Check whether `peer` has been revoked by `issuer`.
    async fn check_revocation_status(
        &self,
        peer: &Certificate,
        issuer: &Certificate,
    ) -> Result<RevocationStatus, CertificateValidationError>;
}

/// Builds validator instances for a configured type and budget.
///
/// Returning `None` drops the type from the chain for that call.
pub trait RevocationValidatorFactory: Send + Sync {
    fn create(
        &self,
        kind: RevocationValidatorType,
        budget: &RevocationBudget,
    ) -> Option<Arc<dyn RevocationValidator>>;
}

/// Factory producing the OCSP and CRL validators backed by HTTP
#[derive(Debug, Clone, Default)]
pub struct NetworkValidatorFactory {
    ocsp_responder_url: Option<String>,
    clock_skew: Duration,
}

impl NetworkValidatorFactory {
    pub fn new(ocsp_responder_url: Option<String>, clock_skew: Duration) -> Self {
        Self {
            ocsp_responder_url,
            clock_skew,
        }
    }

    pub fn from_config(config: &RevocationConfig) -> Self {
        Self::new(config.ocsp_responder_url.clone(), config.clock_skew())
    }
}

impl RevocationValidatorFactory for NetworkValidatorFactory {
    fn create(
        &self,
        kind: RevocationValidatorType,
        budget: &RevocationBudget,
    ) -> Option<Arc<dyn RevocationValidator>> {
        let transport = match RevocationTransport::new(*budget) {
            Ok(transport) => transport,
            Err(e) => {
                warn!(validator = %kind, error = %e, "Unable to create revocation validator");
                return None;
            }
        };

        let validator: Arc<dyn RevocationValidator> = match kind {
            RevocationValidatorType::Ocsp => Arc::new(OcspValidator::new(
                transport,
                self.ocsp_responder_url.clone(),
                self.clock_skew,
            )),
            RevocationValidatorType::Crl => Arc::new(CrlValidator::new(transport, self.clock_skew)),
        };
        Some(validator)
    }
}
