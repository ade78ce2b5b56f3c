//! Owned X.509 certificate view
//!
//! Parses the certificate once with x509-parser and keeps the attributes the validators need,
//! together with the original DER so that callers can re-parse for signature checks.
use crate::error::{Result, TrustError};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::*;

/// id-ad-ocsp access method in the Authority Information Access extension
const OID_AD_OCSP: &str = "1.3.6.1.5.5.7.48.1";
/// organizationIdentifier attribute carrying the PSP authorisation number
const OID_ORGANIZATION_IDENTIFIER: &str = "2.5.4.97";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    subject: String,
    issuer: String,
    subject_raw: Vec<u8>,
    issuer_raw: Vec<u8>,
    serial: Vec<u8>,
    public_key: Vec<u8>,
    common_name: Option<String>,
    organization_identifier: Option<String>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    extensions: BTreeMap<String, Vec<u8>>,
    ocsp_urls: Vec<String>,
    crl_urls: Vec<String>,
    fingerprint_sha256: String,
}

impl Certificate {
    /// Parse a DER encoded certificate.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::InvalidCertificate` if the bytes are not a valid X.509 certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_rem, cert) = X509Certificate::from_der(der)
            .map_err(|e| TrustError::InvalidCertificate(format!("Failed to parse X.509 certificate: {}", e)))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .map(str::to_string);

        let organization_identifier = cert
            .subject()
            .iter_attributes()
            .find(|attr| attr.attr_type().to_id_string() == OID_ORGANIZATION_IDENTIFIER)
            .and_then(|attr| attr.as_str().ok())
            .map(str::to_string);

        let not_before = DateTime::<Utc>::from_timestamp(cert.validity().not_before.timestamp(), 0)
            .ok_or_else(|| TrustError::InvalidCertificate("Invalid not_before timestamp".to_string()))?;
        let not_after = DateTime::<Utc>::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| TrustError::InvalidCertificate("Invalid not_after timestamp".to_string()))?;

        let mut extensions = BTreeMap::new();
        let mut ocsp_urls = Vec::new();
        let mut crl_urls = Vec::new();
        for ext in cert.extensions() {
            extensions.insert(ext.oid.to_id_string(), ext.value.to_vec());
            match ext.parsed_extension() {
                ParsedExtension::AuthorityInfoAccess(aia) => {
                    for desc in &aia.accessdescs {
                        if desc.access_method.to_id_string() != OID_AD_OCSP {
                            continue;
                        }
                        if let GeneralName::URI(uri) = &desc.access_location {
                            ocsp_urls.push((*uri).to_string());
                        }
                    }
                }
                ParsedExtension::CRLDistributionPoints(cdp) => {
                    for point in &cdp.points {
                        if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                            for name in names {
                                if let GeneralName::URI(uri) = name {
                                    crl_urls.push((*uri).to_string());
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        let fingerprint_sha256 = hex::encode(Sha256::digest(der));

        Ok(Self {
            der: der.to_vec(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            subject_raw: cert.subject().as_raw().to_vec(),
            issuer_raw: cert.issuer().as_raw().to_vec(),
            serial: cert.raw_serial().to_vec(),
            public_key: cert.public_key().subject_public_key.data.to_vec(),
            common_name,
            organization_identifier,
            not_before,
            not_after,
            extensions,
            ocsp_urls,
            crl_urls,
            fingerprint_sha256,
        })
    }

    /// Parse a certificate given either as PEM text or as raw DER.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::InvalidCertificate` on malformed PEM or DER.
    pub fn from_pem_or_der(bytes: &[u8]) -> Result<Self> {
        if bytes.starts_with(b"-----BEGIN") || bytes.windows(11).any(|w| w == b"-----BEGIN ") {
            let pem = ::pem::parse(bytes)
                .map_err(|e| TrustError::InvalidCertificate(format!("Failed to decode PEM: {}", e)))?;
            if pem.tag() != "CERTIFICATE" {
                return Err(TrustError::InvalidCertificate(format!(
                    "Expected a CERTIFICATE PEM block, found {}",
                    pem.tag()
                )));
            }
            Self::from_der(pem.contents())
        } else {
            Self::from_der(bytes)
        }
    }

    /// Original DER encoding
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// DER encoding of the subject Name
    pub fn subject_raw(&self) -> &[u8] {
        &self.subject_raw
    }

    /// DER encoding of the issuer Name
    pub fn issuer_raw(&self) -> &[u8] {
        &self.issuer_raw
    }

    /// Serial number as encoded in the certificate (big-endian, unsigned)
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    pub fn serial_hex(&self) -> String {
        hex::encode(&self.serial)
    }

    /// Contents of the subjectPublicKey BIT STRING
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    pub fn organization_identifier(&self) -> Option<&str> {
        self.organization_identifier.as_deref()
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    /// Raw extension value (contents of extnValue) keyed by dotted OID
    pub fn extension(&self, oid: &str) -> Option<&[u8]> {
        self.extensions.get(oid).map(Vec::as_slice)
    }

    pub fn extensions(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.extensions
    }

    /// OCSP responder URLs from the Authority Information Access extension
    pub fn ocsp_urls(&self) -> &[String] {
        &self.ocsp_urls
    }

    /// URIs from the CRL Distribution Points extension
    pub fn crl_urls(&self) -> &[String] {
        &self.crl_urls
    }

    pub fn fingerprint_sha256(&self) -> &str {
        &self.fingerprint_sha256
    }

    /// Whether `issuer` is named as this certificate's issuer
    pub fn is_issued_by(&self, issuer: &Certificate) -> bool {
        self.issuer_raw == issuer.subject_raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_is_rejected() {
        let err = Certificate::from_der(b"not a certificate").unwrap_err();
        assert!(matches!(err, TrustError::InvalidCertificate(_)));
    }

    #[test]
    fn test_wrong_pem_tag_is_rejected() {
        let pem = ::pem::encode(&::pem::Pem::new("PRIVATE KEY", vec![1, 2, 3]));
        let err = Certificate::from_pem_or_der(pem.as_bytes()).unwrap_err();
        assert!(matches!(err, TrustError::InvalidCertificate(msg) if msg.contains("PRIVATE KEY")));
    }

    #[test]
    fn test_parses_generated_certificate() {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["tpp.example".to_string()]).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, "Example TPP");
        params.serial_number = Some(rcgen::SerialNumber::from_slice(&[0x01, 0x2a]));
        params.crl_distribution_points = vec![rcgen::CrlDistributionPoint {
            uris: vec!["http://crl.example.test/ca.crl".to_string()],
        }];
        let generated = params.self_signed(&key).unwrap();

        let cert = Certificate::from_pem_or_der(generated.pem().as_bytes()).unwrap();
        assert_eq!(cert.common_name(), Some("Example TPP"));
        assert_eq!(cert.serial(), &[0x01, 0x2a]);
        assert_eq!(cert.serial_hex(), "012a");
        assert_eq!(cert.crl_urls(), &["http://crl.example.test/ca.crl".to_string()]);
        assert!(cert.ocsp_urls().is_empty());
        assert!(cert.extension("2.5.29.31").is_some());
        assert!(cert.is_issued_by(&cert));
        assert!(cert.is_valid_at(Utc::now()));
        assert_eq!(cert.fingerprint_sha256().len(), 64);
        assert_eq!(cert.der(), generated.der().as_ref());
    }
}
