//! Trust validation configuration
//!
//! Loaded once at startup and shared read-only by every validation call:
//! - Revocation validator priority map and per-type network budgets
//! - Role validation mode flags
//! - Result cache sizing

use crate::error::{Result, TrustError};
use crate::models::RevocationValidatorType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Prefix for environment overrides, e.g. `TPP_TRUST__CACHE__TTL_SECS=600`
pub const ENV_PREFIX: &str = "TPP_TRUST";

/// Main trust validation configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TrustValidationConfig {
    /// Certificate revocation checking
    #[serde(default)]
    pub revocation: RevocationConfig,

    /// PSD2 role validation
    #[serde(default)]
    pub roles: RoleValidationConfig,

    /// Validation result cache
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Revocation validator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RevocationConfig {
    /// Priority (as written in the source) -> validator type name.
    /// Lower priorities run first.
    #[serde(default = "default_validators")]
    pub validators: BTreeMap<String, String>,

    /// OCSP network budget
    #[serde(default)]
    pub ocsp: ValidatorSettings,

    /// CRL network budget
    #[serde(default)]
    pub crl: ValidatorSettings,

    /// OCSP responder URL used when the certificate carries no AIA entry
    pub ocsp_responder_url: Option<String>,

    /// Allowed clock skew when checking revocation data freshness, in seconds
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: u64,
}

/// Retry count and timeouts for one validator type
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ValidatorSettings {
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub connection_request_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub socket_timeout_ms: u64,
}

/// Role validation mode flags
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoleValidationConfig {
    /// Delegate role validation to a registered TPP validation service
    #[serde(default = "default_false")]
    pub tpp_validation_enabled: bool,

    /// Match required roles against the roles embedded in the eIDAS certificate
    #[serde(default = "default_true")]
    pub psd2_role_validation_enabled: bool,
}

/// Validation result cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Time to live of a cached outcome in seconds (default: 3600 = 1 hour)
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Maximum number of cached outcomes
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: u64,
}

// Default value functions

fn default_validators() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("1".to_string(), "OCSP".to_string()),
        ("2".to_string(), "CRL".to_string()),
    ])
}

fn default_retry_count() -> u32 { 3 }
fn default_timeout_ms() -> u64 { 5000 }
fn default_clock_skew() -> u64 { 300 } // 5 minutes
fn default_cache_ttl() -> u64 { 3600 } // 1 hour
fn default_cache_max_entries() -> u64 { 10_000 }
fn default_true() -> bool { true }
fn default_false() -> bool { false }

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            validators: default_validators(),
            ocsp: ValidatorSettings::default(),
            crl: ValidatorSettings::default(),
            ocsp_responder_url: None,
            clock_skew_secs: default_clock_skew(),
        }
    }
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            connect_timeout_ms: default_timeout_ms(),
            connection_request_timeout_ms: default_timeout_ms(),
            socket_timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for RoleValidationConfig {
    fn default() -> Self {
        Self {
            tpp_validation_enabled: false,
            psd2_role_validation_enabled: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_max_entries(),
        }
    }
}

impl TrustValidationConfig {
    /// Load configuration from an optional file layered with `TPP_TRUST__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::Configuration` when the file cannot be read or a value has the wrong
    /// shape.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

impl RevocationConfig {
    /// Validator types in ascending priority order.
    ///
    /// Entries whose priority is not an integer or whose type is unknown are dropped with a
    /// warning. Equal priorities keep the iteration order of the source map.
    pub fn ordered_validators(&self) -> Vec<(i32, RevocationValidatorType)> {
        let mut ordered: Vec<(i32, RevocationValidatorType)> = self
            .validators
            .iter()
            .filter_map(|(priority, kind)| {
                let priority = match priority.trim().parse::<i32>() {
                    Ok(p) => p,
                    Err(_) => {
                        warn!(priority = %priority, "Ignoring revocation validator with non-numeric priority");
                        return None;
                    }
                };
                match kind.parse::<RevocationValidatorType>() {
                    Ok(kind) => Some((priority, kind)),
                    Err(e) => {
                        warn!(priority, error = %e, "Ignoring revocation validator");
                        None
                    }
                }
            })
            .collect();
        // stable: ties keep map order
        ordered.sort_by_key(|(priority, _)| *priority);
        ordered
    }

    /// Configured settings for a validator type
    pub fn settings(&self, kind: RevocationValidatorType) -> &ValidatorSettings {
        match kind {
            RevocationValidatorType::Ocsp => &self.ocsp,
            RevocationValidatorType::Crl => &self.crl,
        }
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl RoleValidationConfig {
    /// Reject flag combinations that can never validate anything.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::Configuration` when both modes are disabled.
    pub fn ensure_some_mode(&self) -> Result<()> {
        if !self.tpp_validation_enabled && !self.psd2_role_validation_enabled {
            return Err(TrustError::Configuration(
                "Both TPP validation and PSD2 role validation services are disabled".to_string(),
            ));
        }
        Ok(())
    }
}
