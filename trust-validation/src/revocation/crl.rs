//! CRL revocation validator (RFC 5280)

use super::{check_freshness, RevocationTransport, RevocationValidator};
use crate::certificate::Certificate;
use crate::error::CertificateValidationError;
use crate::models::RevocationStatus;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, warn};
use x509_parser::prelude::*;

/// Revocation validator downloading the CRLs named in the certificate's distribution points
#[derive(Debug, Clone)]
pub struct CrlValidator {
    transport: RevocationTransport,
    clock_skew: Duration,
}

impl CrlValidator {
    pub fn new(transport: RevocationTransport, clock_skew: Duration) -> Self {
        Self {
            transport,
            clock_skew,
        }
    }
}

#[async_trait]
impl RevocationValidator for CrlValidator {
    fn name(&self) -> &'static str {
        "CRL"
    }

    async fn check_revocation_status(
        &self,
        peer: &Certificate,
        issuer: &Certificate,
    ) -> Result<RevocationStatus, CertificateValidationError> {
        if peer.crl_urls().is_empty() {
            return Err(CertificateValidationError::MissingEndpoint("CRL"));
        }

        let lookup = async {
            let mut last_error = None;
            for url in peer.crl_urls() {
                debug!(url = %url, serial = %peer.serial_hex(), "Fetching CRL");
                let outcome = match self.transport.get(url).await {
                    Ok(body) => evaluate_crl(&body, peer, issuer, Utc::now().timestamp(), self.clock_skew),
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(status) => return Ok(status),
                    Err(e) => {
                        warn!(url = %url, error = %e, "CRL distribution point failed");
                        last_error = Some(e);
                    }
                }
            }
            Err(last_error.unwrap_or(CertificateValidationError::MissingEndpoint("CRL")))
        };

        self.transport.within_call_budget("CRL distribution points", lookup).await
    }
}

/// Look up `peer` in a DER or PEM encoded CRL issued by `issuer`, at unix time `now`.
///
/// # Errors
///
/// Fails when the CRL is malformed, issued by another authority, carries a bad signature, or
/// is outside its validity window.
pub fn evaluate_crl(
    body: &[u8],
    peer: &Certificate,
    issuer: &Certificate,
    now: i64,
    clock_skew: Duration,
) -> Result<RevocationStatus, CertificateValidationError> {
    let der = decode_crl_body(body)?;
    let (_, crl) = CertificateRevocationList::from_der(&der)
        .map_err(|e| CertificateValidationError::MalformedCrl(e.to_string()))?;

    if crl.issuer().as_raw() != issuer.subject_raw() {
        return Err(CertificateValidationError::MalformedCrl(format!(
            "CRL issued by {} instead of {}",
            crl.issuer(),
            issuer.subject()
        )));
    }

    let (_, issuer_cert) = X509Certificate::from_der(issuer.der())
        .map_err(|e| CertificateValidationError::Signature(e.to_string()))?;
    crl.verify_signature(issuer_cert.public_key())
        .map_err(|e| CertificateValidationError::Signature(format!("CRL signature: {}", e)))?;

    check_freshness(
        crl.last_update().timestamp(),
        crl.next_update().map(|t| t.timestamp()),
        now,
        clock_skew,
    )?;

    let revoked = crl
        .iter_revoked_certificates()
        .any(|entry| entry.raw_serial() == peer.serial());

    Ok(if revoked {
        RevocationStatus::Revoked
    } else {
        RevocationStatus::Good
    })
}

fn decode_crl_body(body: &[u8]) -> Result<Vec<u8>, CertificateValidationError> {
    if !body.starts_with(b"-----BEGIN") {
        return Ok(body.to_vec());
    }
    let pem = ::pem::parse(body).map_err(|e| CertificateValidationError::MalformedCrl(e.to_string()))?;
    if pem.tag() != "X509 CRL" {
        return Err(CertificateValidationError::MalformedCrl(format!(
            "expected an X509 CRL PEM block, found {}",
            pem.tag()
        )));
    }
    Ok(pem.into_contents())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revocation::RevocationBudget;
    use rcgen::{
        BasicConstraints, CertificateParams, CertificateRevocationListParams, CrlDistributionPoint,
        DnType, IsCa, KeyIdMethod, KeyPair, KeyUsagePurpose, RevokedCertParams, SerialNumber,
    };

    const SKEW: Duration = Duration::from_secs(300);

    struct Pki {
        ca_key: KeyPair,
        ca: rcgen::Certificate,
        issuer: Certificate,
    }

    fn pki() -> Pki {
        let ca_key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, "Test QTSP CA");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let ca = params.self_signed(&ca_key).unwrap();
        Pki {
            issuer: Certificate::from_der(ca.der()).unwrap(),
            ca_key,
            ca,
        }
    }

    fn leaf(pki: &Pki, serial: &[u8], crl_urls: Vec<String>) -> Certificate {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["tpp.example".to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, "Example TPP");
        params.serial_number = Some(SerialNumber::from_slice(serial));
        if !crl_urls.is_empty() {
            params.crl_distribution_points = vec![CrlDistributionPoint { uris: crl_urls }];
        }
        let cert = params.signed_by(&key, &pki.ca, &pki.ca_key).unwrap();
        Certificate::from_der(cert.der()).unwrap()
    }

    fn crl(pki: &Pki, revoked: &[u8], next_year: i32) -> rcgen::CertificateRevocationList {
        CertificateRevocationListParams {
            this_update: rcgen::date_time_ymd(2024, 1, 1),
            next_update: rcgen::date_time_ymd(next_year, 1, 1),
            crl_number: SerialNumber::from(1u64),
            issuing_distribution_point: None,
            revoked_certs: vec![RevokedCertParams {
                serial_number: SerialNumber::from_slice(revoked),
                revocation_time: rcgen::date_time_ymd(2024, 1, 1),
                reason_code: None,
                invalidity_date: None,
            }],
            key_identifier_method: KeyIdMethod::Sha256,
        }
        .signed_by(&pki.ca, &pki.ca_key)
        .unwrap()
    }

    #[test]
    fn test_serial_lookup() {
        let pki = pki();
        let list = crl(&pki, &[0x0a, 0x01], 2099);
        let now = Utc::now().timestamp();

        let revoked = leaf(&pki, &[0x0a, 0x01], Vec::new());
        let good = leaf(&pki, &[0x0a, 0x02], Vec::new());
        assert_eq!(
            evaluate_crl(list.der(), &revoked, &pki.issuer, now, SKEW).unwrap(),
            RevocationStatus::Revoked
        );
        assert_eq!(
            evaluate_crl(list.der(), &good, &pki.issuer, now, SKEW).unwrap(),
            RevocationStatus::Good
        );
        assert_eq!(
            evaluate_crl(list.pem().unwrap().as_bytes(), &revoked, &pki.issuer, now, SKEW).unwrap(),
            RevocationStatus::Revoked
        );
    }

    #[test]
    fn test_expired_crl_is_stale() {
        let pki = pki();
        let list = crl(&pki, &[0x0a, 0x01], 2025);
        let peer = leaf(&pki, &[0x0a, 0x02], Vec::new());
        let after_next_update = rcgen::date_time_ymd(2026, 1, 1).unix_timestamp();
        assert!(matches!(
            evaluate_crl(list.der(), &peer, &pki.issuer, after_next_update, SKEW),
            Err(CertificateValidationError::Stale(_))
        ));
    }

    #[test]
    fn test_crl_from_other_authority_is_rejected() {
        let pki = pki();
        let other = {
            let ca_key = KeyPair::generate().unwrap();
            let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
            params.distinguished_name.push(DnType::CommonName, "Other CA");
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
            let ca = params.self_signed(&ca_key).unwrap();
            Pki {
                issuer: Certificate::from_der(ca.der()).unwrap(),
                ca_key,
                ca,
            }
        };
        let list = crl(&other, &[0x0a, 0x01], 2099);
        let peer = leaf(&pki, &[0x0a, 0x01], Vec::new());
        assert!(matches!(
            evaluate_crl(list.der(), &peer, &pki.issuer, Utc::now().timestamp(), SKEW),
            Err(CertificateValidationError::MalformedCrl(_))
        ));
    }

    #[test]
    fn test_garbage_body_is_malformed() {
        let pki = pki();
        let peer = leaf(&pki, &[0x01], Vec::new());
        assert!(matches!(
            evaluate_crl(b"not a crl", &peer, &pki.issuer, 0, SKEW),
            Err(CertificateValidationError::MalformedCrl(_))
        ));
    }

    #[tokio::test]
    async fn test_falls_through_to_next_distribution_point() {
        let pki = pki();
        let list = crl(&pki, &[0x0a, 0x01], 2099);

        let mut server = mockito::Server::new_async().await;
        let broken = server
            .mock("GET", "/broken.crl")
            .with_status(503)
            .create_async()
            .await;
        let served = server
            .mock("GET", "/ca.crl")
            .with_status(200)
            .with_body(list.der().to_vec())
            .create_async()
            .await;

        let peer = leaf(
            &pki,
            &[0x0a, 0x01],
            vec![format!("{}/broken.crl", server.url()), format!("{}/ca.crl", server.url())],
        );
        let transport = RevocationTransport::new(RevocationBudget::new(1, 1000, 1000, 1000)).unwrap();
        let validator = CrlValidator::new(transport, SKEW);

        let status = validator.check_revocation_status(&peer, &pki.issuer).await.unwrap();
        assert_eq!(status, RevocationStatus::Revoked);
        broken.assert_async().await;
        served.assert_async().await;
    }

    /// Accepts connections and never answers
    async fn silent_listener() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_many_silent_distribution_points_share_one_deadline() {
        let pki = pki();
        let base = silent_listener().await;
        let urls = (0..5).map(|i| format!("{}/dp{}.crl", base, i)).collect();
        let peer = leaf(&pki, &[0x0b, 0x01], urls);

        let budget = RevocationBudget::new(1, 100, 100, 100);
        let validator = CrlValidator::new(RevocationTransport::new(budget).unwrap(), SKEW);

        let started = std::time::Instant::now();
        let err = validator.check_revocation_status(&peer, &pki.issuer).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, CertificateValidationError::Timeout { .. }));
        assert!(
            elapsed < budget.worst_case() + Duration::from_millis(250),
            "worst case {:?}, took {:?}",
            budget.worst_case(),
            elapsed
        );
    }

    #[tokio::test]
    async fn test_certificate_without_distribution_points() {
        let pki = pki();
        let peer = leaf(&pki, &[0x01], Vec::new());
        let transport = RevocationTransport::new(RevocationBudget::new(1, 1000, 1000, 1000)).unwrap();
        let validator = CrlValidator::new(transport, SKEW);
        assert!(matches!(
            validator.check_revocation_status(&peer, &pki.issuer).await,
            Err(CertificateValidationError::MissingEndpoint("CRL"))
        ));
    }
}
