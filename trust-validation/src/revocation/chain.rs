//! Priority-ordered revocation validator chain

use super::{
    NetworkValidatorFactory, RevocationBudget, RevocationValidator, RevocationValidatorFactory,
};
use crate::certificate::Certificate;
use crate::config::RevocationConfig;
use crate::error::{Result, TrustError};
use crate::models::{RevocationStatus, RevocationValidatorType};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Runs the configured revocation validators until one gives a conclusive answer.
///
/// The validator order is fixed when the chain is built; validator instances are created per
/// call so that every call gets its own network budget.
#[derive(Clone)]
pub struct RevocationValidatorChain {
    config: RevocationConfig,
    ordered: Vec<(i32, RevocationValidatorType)>,
    factory: Arc<dyn RevocationValidatorFactory>,
}

impl RevocationValidatorChain {
    /// Chain backed by the HTTP OCSP and CRL validators
    pub fn new(config: RevocationConfig) -> Self {
        let factory = Arc::new(NetworkValidatorFactory::from_config(&config));
        Self::with_factory(config, factory)
    }

    pub fn with_factory(config: RevocationConfig, factory: Arc<dyn RevocationValidatorFactory>) -> Self {
        let ordered = config.ordered_validators();
        debug!(validators = ?ordered, "Revocation validator chain configured");
        Self {
            config,
            ordered,
            factory,
        }
    }

    /// Validator types in the order they are consulted
    pub fn validator_types(&self) -> Vec<RevocationValidatorType> {
        self.ordered.iter().map(|(_, kind)| *kind).collect()
    }

    /// Check `peer` with every validator sharing the same budget.
    ///
    /// Returns `Ok(true)` on the first `Good`, `Ok(false)` on the first `Revoked` or when every
    /// validator is inconclusive.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::Configuration` when no usable validator is configured.
    pub async fn verify(
        &self,
        peer: &Certificate,
        issuer: &Certificate,
        budget: &RevocationBudget,
    ) -> Result<bool> {
        let validators = self.build(|_| *budget)?;
        Ok(Self::evaluate(&validators, peer, issuer).await)
    }

    /// Retry-only variant of [`verify`](Self::verify) using the default timeouts.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::Configuration` when no usable validator is configured.
    #[deprecated(note = "use `verify` with an explicit `RevocationBudget`")]
    pub async fn verify_with_retry(
        &self,
        peer: &Certificate,
        issuer: &Certificate,
        retry_count: u32,
    ) -> Result<bool> {
        self.verify(peer, issuer, &RevocationBudget::with_default_timeouts(retry_count))
            .await
    }

    /// Check `peer` using the budget configured for each validator type.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::Configuration` when no usable validator is configured.
    pub async fn verify_configured(&self, peer: &Certificate, issuer: &Certificate) -> Result<bool> {
        let validators = self.build(|kind| RevocationBudget::from(self.config.settings(kind)))?;
        Ok(Self::evaluate(&validators, peer, issuer).await)
    }

    fn build(
        &self,
        budget_for: impl Fn(RevocationValidatorType) -> RevocationBudget,
    ) -> Result<Vec<Arc<dyn RevocationValidator>>> {
        let validators: Vec<Arc<dyn RevocationValidator>> = self
            .ordered
            .iter()
            .filter_map(|(priority, kind)| {
                let validator = self.factory.create(*kind, &budget_for(*kind));
                if validator.is_none() {
                    warn!(priority, validator = %kind, "Revocation validator unavailable, skipping");
                }
                validator
            })
            .collect();

        if validators.is_empty() {
            return Err(TrustError::Configuration(
                "No usable certificate revocation validator is configured".to_string(),
            ));
        }
        Ok(validators)
    }

    async fn evaluate(
        validators: &[Arc<dyn RevocationValidator>],
        peer: &Certificate,
        issuer: &Certificate,
    ) -> bool {
        for validator in validators {
            match Self::revocation_status(validator.as_ref(), peer, issuer).await {
                RevocationStatus::Good => return true,
                RevocationStatus::Revoked => {
                    debug!(validator = validator.name(), serial = %peer.serial_hex(), "Certificate revoked");
                    return false;
                }
                RevocationStatus::Unknown => continue,
            }
        }

        error!(serial = %peer.serial_hex(), "Unable to verify certificate revocation information");
        false
    }

    async fn revocation_status(
        validator: &dyn RevocationValidator,
        peer: &Certificate,
        issuer: &Certificate,
    ) -> RevocationStatus {
        debug!(validator = validator.name(), "X509 certificate revocation check");
        match validator.check_revocation_status(peer, issuer).await {
            Ok(status) => status,
            Err(e) => {
                warn!(validator = validator.name(), error = %e, "Certificate revocation check failed");
                RevocationStatus::Unknown
            }
        }
    }
}

impl std::fmt::Debug for RevocationValidatorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationValidatorChain")
            .field("validators", &self.ordered)
            .finish_non_exhaustive()
    }
}
