use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trust_validation::{
    Certificate, CertificateContent, CertificateContentExtractor, Psd2Role, RevocationBudget,
    RevocationValidatorChain, RoleValidationConfig, TrustError, TrustRoleValidator,
    TrustValidationConfig, ValidationResultCache,
};

/// TPP certificate trust validation tool
#[derive(Parser, Debug)]
#[command(name = "tppctl")]
#[command(about = "Check revocation status and PSD2 roles of TPP certificates")]
struct Args {
    /// Configuration file path (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "TPP_TRUST_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether a certificate has been revoked
    Revocation {
        /// Peer certificate (PEM or DER)
        #[arg(long)]
        peer: PathBuf,

        /// Issuer certificate (PEM or DER)
        #[arg(long)]
        issuer: PathBuf,

        /// Attempts per endpoint; overrides the configured budget
        #[arg(long)]
        retry_count: Option<u32>,

        #[arg(long)]
        connect_timeout_ms: Option<u64>,

        #[arg(long)]
        request_timeout_ms: Option<u64>,

        #[arg(long)]
        socket_timeout_ms: Option<u64>,
    },

    /// Match required PSD2 roles against the roles embedded in a certificate
    Roles {
        /// eIDAS certificate (PEM or DER)
        #[arg(long)]
        cert: PathBuf,

        /// Required roles, e.g. AISP,PISP
        #[arg(long, value_delimiter = ',', required = true)]
        require: Vec<Psd2Role>,
    },

    /// Print certificate details and PSD2 content as JSON
    Inspect {
        /// Certificate (PEM or DER)
        #[arg(long)]
        cert: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct CertificateSummary {
    subject: String,
    issuer: String,
    serial: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    fingerprint_sha256: String,
    ocsp_urls: Vec<String>,
    crl_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    psd2: Option<CertificateContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    psd2_error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose, args.json_logs);

    let config = TrustValidationConfig::load(args.config.as_deref())
        .context("Failed to load trust validation configuration")?;
    debug!(config = ?config, "Configuration loaded");

    match args.command {
        Command::Revocation {
            peer,
            issuer,
            retry_count,
            connect_timeout_ms,
            request_timeout_ms,
            socket_timeout_ms,
        } => {
            let peer = read_certificate(&peer)?;
            let issuer = read_certificate(&issuer)?;
            let chain = RevocationValidatorChain::new(config.revocation.clone());

            let overrides = [connect_timeout_ms, request_timeout_ms, socket_timeout_ms];
            let trusted = if retry_count.is_some() || overrides.iter().any(Option::is_some) {
                let defaults = &config.revocation.ocsp;
                let budget = RevocationBudget::new(
                    retry_count.unwrap_or(defaults.retry_count),
                    connect_timeout_ms.unwrap_or(defaults.connect_timeout_ms),
                    request_timeout_ms.unwrap_or(defaults.connection_request_timeout_ms),
                    socket_timeout_ms.unwrap_or(defaults.socket_timeout_ms),
                );
                let worst_case_ms = u64::try_from(budget.worst_case().as_millis()).unwrap_or(u64::MAX);
                info!(worst_case_ms, "Checking revocation");
                chain.verify(&peer, &issuer, &budget).await?
            } else {
                chain.verify_configured(&peer, &issuer).await?
            };

            if trusted {
                println!("GOOD {}", peer.subject());
                Ok(ExitCode::SUCCESS)
            } else {
                println!("NOT TRUSTED {} (revoked or undetermined)", peer.subject());
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Roles { cert, require } => {
            let cert = read_certificate(&cert)?;
            let embedded = RoleValidationConfig {
                tpp_validation_enabled: false,
                psd2_role_validation_enabled: true,
            };
            let validator = TrustRoleValidator::new(
                &embedded,
                None,
                Arc::new(ValidationResultCache::from_config(&config.cache)),
            );

            match validator.validate_roles(&cert, &require).await {
                Ok(_) => {
                    let names: Vec<&str> = require.iter().map(|r| r.name()).collect();
                    println!("OK {} holds {}", cert.subject(), names.join(", "));
                    Ok(ExitCode::SUCCESS)
                }
                Err(e @ (TrustError::Validation(_) | TrustError::CertificateContent(_))) => {
                    println!("DENIED {}: {}", cert.subject(), e);
                    Ok(ExitCode::FAILURE)
                }
                Err(e) => Err(e.into()),
            }
        }
        Command::Inspect { cert } => {
            let cert = read_certificate(&cert)?;
            let (psd2, psd2_error) = match CertificateContentExtractor::extract(&cert) {
                Ok(content) => (Some(content), None),
                Err(e) => (None, Some(e.to_string())),
            };
            let summary = CertificateSummary {
                subject: cert.subject().to_string(),
                issuer: cert.issuer().to_string(),
                serial: cert.serial_hex(),
                not_before: cert.not_before(),
                not_after: cert.not_after(),
                fingerprint_sha256: cert.fingerprint_sha256().to_string(),
                ocsp_urls: cert.ocsp_urls().to_vec(),
                crl_urls: cert.crl_urls().to_vec(),
                psd2,
                psd2_error,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn read_certificate(path: &Path) -> Result<Certificate> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Certificate::from_pem_or_der(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("tppctl={level},trust_validation={level},reqwest=warn").into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
