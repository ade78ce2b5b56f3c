//! PSD2 role entitlement checks
//!
//! Two modes, fixed when the validator is built:
//! - Delegated: an external TPP validation service decides, positive outcomes are cached
//! - Embedded: required roles are matched against the roles in the eIDAS certificate

use crate::cache::ValidationResultCache;
use crate::certificate::Certificate;
use crate::config::RoleValidationConfig;
use crate::error::{Result, TrustError};
use crate::extractor::CertificateContentExtractor;
use crate::models::Psd2Role;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Extra request attributes handed to a delegated validation service
pub type ValidationContext = HashMap<String, Value>;

/// Externally provided TPP validation, e.g. a call to a national register
#[async_trait]
pub trait TppValidationService: Send + Sync {
    /// Key under which a positive outcome for this request may be cached.
    ///
    /// # Errors
    ///
    /// Implementations return `TrustError::Validation` when no key can be derived.
    fn cache_key(
        &self,
        cert: &Certificate,
        roles: &[Psd2Role],
        context: &ValidationContext,
    ) -> Result<String>;

    /// Decide whether `cert` is entitled to `roles`.
    ///
    /// # Errors
    ///
    /// Implementations return `TrustError::Validation` when the decision cannot be made.
    async fn validate(
        &self,
        cert: &Certificate,
        roles: &[Psd2Role],
        context: &ValidationContext,
    ) -> Result<bool>;
}

#[derive(Clone)]
enum RoleValidationMode {
    Delegated(Arc<dyn TppValidationService>),
    Embedded,
    Misconfigured(TrustError),
}

/// Role entitlement validator shared by all requests
#[derive(Clone)]
pub struct TrustRoleValidator {
    mode: RoleValidationMode,
    cache: Arc<ValidationResultCache>,
}

impl TrustRoleValidator {
    pub fn new(
        config: &RoleValidationConfig,
        delegate: Option<Arc<dyn TppValidationService>>,
        cache: Arc<ValidationResultCache>,
    ) -> Self {
        let mode = Self::resolve_mode(config, delegate);
        match &mode {
            RoleValidationMode::Delegated(_) => info!("TPP role validation delegated to external service"),
            RoleValidationMode::Embedded => info!("TPP role validation uses eIDAS certificate roles"),
            RoleValidationMode::Misconfigured(reason) => error!(reason = %reason, "TPP role validation is misconfigured"),
        }
        Self { mode, cache }
    }

    fn resolve_mode(
        config: &RoleValidationConfig,
        delegate: Option<Arc<dyn TppValidationService>>,
    ) -> RoleValidationMode {
        if config.tpp_validation_enabled {
            let Some(delegate) = delegate else {
                return RoleValidationMode::Misconfigured(TrustError::Configuration(
                    "Unable to find the implementation for TPP validation service".to_string(),
                ));
            };
            if config.psd2_role_validation_enabled {
                warn!("Both TPP validation and PSD2 role validation are enabled; using TPP validation");
            }
            return RoleValidationMode::Delegated(delegate);
        }

        if delegate.is_some() {
            debug!("TPP validation service registered but disabled");
        }
        match config.ensure_some_mode() {
            Ok(()) => RoleValidationMode::Embedded,
            Err(e) => RoleValidationMode::Misconfigured(e),
        }
    }

    /// "delegated", "embedded" or "misconfigured"
    pub fn mode_name(&self) -> &'static str {
        match self.mode {
            RoleValidationMode::Delegated(_) => "delegated",
            RoleValidationMode::Embedded => "embedded",
            RoleValidationMode::Misconfigured(_) => "misconfigured",
        }
    }

    /// Fail fast on a configuration that can never validate a request.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::Configuration` describing the problem.
    pub fn ensure_configured(&self) -> Result<()> {
        match &self.mode {
            RoleValidationMode::Misconfigured(err) => Err(err.clone()),
            _ => Ok(()),
        }
    }

    /// Check that `cert` is entitled to every role in `required`.
    ///
    /// # Errors
    ///
    /// - `TrustError::Configuration` when no validation mode is usable
    /// - `TrustError::Validation` when a required role is missing or the delegate fails
    /// - `TrustError::CertificateContent` when the certificate roles cannot be extracted
    pub async fn validate_roles(&self, cert: &Certificate, required: &[Psd2Role]) -> Result<bool> {
        match &self.mode {
            RoleValidationMode::Delegated(delegate) => {
                self.validate_delegated(delegate.as_ref(), cert, required).await
            }
            RoleValidationMode::Embedded => {
                let content = CertificateContentExtractor::extract(cert)?;
                Self::validate_embedded(required, &content.psp_roles)
            }
            RoleValidationMode::Misconfigured(err) => Err(err.clone()),
        }
    }

    /// Like [`validate_roles`](Self::validate_roles), with the certificate roles already extracted.
    ///
    /// `cert_roles` is only consulted in embedded mode.
    ///
    /// # Errors
    ///
    /// Same as [`validate_roles`](Self::validate_roles).
    pub async fn validate_roles_with_cert_roles(
        &self,
        cert: &Certificate,
        required: &[Psd2Role],
        cert_roles: &[String],
    ) -> Result<bool> {
        match &self.mode {
            RoleValidationMode::Delegated(delegate) => {
                self.validate_delegated(delegate.as_ref(), cert, required).await
            }
            RoleValidationMode::Embedded => Self::validate_embedded(required, cert_roles),
            RoleValidationMode::Misconfigured(err) => Err(err.clone()),
        }
    }

    async fn validate_delegated(
        &self,
        delegate: &dyn TppValidationService,
        cert: &Certificate,
        required: &[Psd2Role],
    ) -> Result<bool> {
        let context = ValidationContext::new();
        let key = delegate.cache_key(cert, required, &context)?;

        if let Some(outcome) = self.cache.get(&key).await {
            debug!(key = %key, outcome, "TPP validation served from cache");
            return Ok(outcome);
        }

        let outcome = delegate.validate(cert, required, &context).await?;
        // negative outcomes are re-evaluated on the next request
        if outcome {
            self.cache.put(key, true).await;
        }
        Ok(outcome)
    }

    fn validate_embedded(required: &[Psd2Role], cert_roles: &[String]) -> Result<bool> {
        for role in required {
            if !cert_roles.iter().any(|r| r == role.name()) {
                let message = format!(
                    "The PSD2 eIDAS certificate does not contain the required role {}",
                    role.name()
                );
                error!(role = role.name(), "{}", message);
                return Err(TrustError::Validation(message));
            }
        }
        Ok(true)
    }
}

impl std::fmt::Debug for TrustRoleValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustRoleValidator")
            .field("mode", &self.mode_name())
            .field("cache", &self.cache)
            .finish()
    }
}
