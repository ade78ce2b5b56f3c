//! TPP trust validation engine for the open-banking gateway
//!
//! Decides, for an already-authenticated TPP client certificate:
//! - Whether it has been revoked, by consulting OCSP and CRL validators in priority order
//! - Whether the PSD2 roles it holds cover the roles an operation requires
//!
//! # Core Concepts
//!
//! - **Revocation chain**: configured validators tried in ascending priority; the first
//!   conclusive answer wins and failures count as "unknown"
//! - **Role validation mode**: delegated to an external TPP validation service, or embedded
//!   matching against the eIDAS QC statement roles
//! - **Result cache**: shared TTL store of positive delegated outcomes
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trust_validation::{
//!     Certificate, Psd2Role, RevocationBudget, RevocationValidatorChain, TrustRoleValidator,
//!     TrustValidationConfig, ValidationResultCache,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TrustValidationConfig::load(None)?;
//!     let peer = Certificate::from_pem_or_der(&std::fs::read("tpp.pem")?)?;
//!     let issuer = Certificate::from_pem_or_der(&std::fs::read("qtsp-ca.pem")?)?;
//!
//!     let chain = RevocationValidatorChain::new(config.revocation.clone());
//!     let not_revoked = chain
//!         .verify(&peer, &issuer, &RevocationBudget::new(3, 5000, 5000, 5000))
//!         .await?;
//!
//!     let cache = Arc::new(ValidationResultCache::from_config(&config.cache));
//!     let roles = TrustRoleValidator::new(&config.roles, None, cache);
//!     let entitled = roles.validate_roles(&peer, &[Psd2Role::Aisp]).await?;
//!
//!     println!("trusted: {}", not_revoked && entitled);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod certificate;
pub mod config;
pub mod error;
pub mod extractor;
pub mod models;
pub mod revocation;
pub mod roles;

pub use cache::ValidationResultCache;
pub use certificate::Certificate;
pub use crate::config::*;
pub use error::*;
pub use extractor::CertificateContentExtractor;
pub use models::*;
pub use revocation::{
    NetworkValidatorFactory, RevocationBudget, RevocationValidator, RevocationValidatorChain,
    RevocationValidatorFactory,
};
pub use roles::{TppValidationService, TrustRoleValidator, ValidationContext};
