//! OCSP revocation validator (RFC 6960)
//!
//! Requests are unsigned and carry a single SHA-1 `CertID`. Responses must be `successful`
//! basic responses signed either by the issuer itself or by a responder certificate that the
//! issuer signed with the `id-kp-OCSPSigning` extended key usage.

use super::{check_freshness, RevocationTransport, RevocationValidator};
use crate::certificate::Certificate;
use crate::error::CertificateValidationError;
use crate::models::RevocationStatus;
use async_trait::async_trait;
use chrono::Utc;
use der::asn1::{Any, BitString, GeneralizedTime, Int, Null, ObjectIdentifier, OctetString};
use der::{Choice, Decode, Encode, Enumerated, Sequence, Tag};
use ring::{digest, signature};
use std::time::Duration;
use tracing::{debug, warn};
use x509_parser::prelude::{FromDer, X509Certificate};

pub const OCSP_REQUEST_CONTENT_TYPE: &str = "application/ocsp-request";

pub const OID_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
pub const OID_PKIX_OCSP_BASIC: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.48.1.1");

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct AlgorithmIdentifier {
    pub algorithm: ObjectIdentifier,
    pub parameters: Option<Any>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CertId {
    pub hash_algorithm: AlgorithmIdentifier,
    pub issuer_name_hash: OctetString,
    pub issuer_key_hash: OctetString,
    pub serial_number: Int,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct OcspRequest {
    pub tbs_request: TbsRequest,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TbsRequest {
    #[asn1(context_specific = "0", default = "Default::default", tag_mode = "EXPLICIT")]
    pub version: u8,
    pub request_list: Vec<Request>,
    #[asn1(context_specific = "2", optional = "true", tag_mode = "EXPLICIT")]
    pub request_extensions: Option<Any>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct Request {
    pub req_cert: CertId,
    #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
    pub single_request_extensions: Option<Any>,
}

#[derive(Clone, Copy, Debug, Enumerated, Eq, PartialEq)]
#[repr(u32)]
pub enum OcspResponseStatus {
    Successful = 0,
    MalformedRequest = 1,
    InternalError = 2,
    TryLater = 3,
    SigRequired = 5,
    Unauthorized = 6,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct OcspResponse {
    pub response_status: OcspResponseStatus,
    #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
    pub response_bytes: Option<ResponseBytes>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct ResponseBytes {
    pub response_type: ObjectIdentifier,
    pub response: OctetString,
}

/// `tbsResponseData` is kept as raw TLV so the signature is checked over the exact bytes received.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct BasicOcspResponse {
    pub tbs_response_data: Any,
    pub signature_algorithm: AlgorithmIdentifier,
    pub signature: BitString,
    #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
    pub certs: Option<Vec<Any>>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct ResponseData {
    #[asn1(context_specific = "0", default = "Default::default", tag_mode = "EXPLICIT")]
    pub version: u8,
    pub responder_id: Any,
    pub produced_at: GeneralizedTime,
    pub responses: Vec<SingleResponse>,
    #[asn1(context_specific = "1", optional = "true", tag_mode = "EXPLICIT")]
    pub response_extensions: Option<Any>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct SingleResponse {
    pub cert_id: CertId,
    pub cert_status: CertStatus,
    pub this_update: GeneralizedTime,
    #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
    pub next_update: Option<GeneralizedTime>,
    #[asn1(context_specific = "1", optional = "true", tag_mode = "EXPLICIT")]
    pub single_extensions: Option<Any>,
}

#[derive(Clone, Debug, Eq, PartialEq, Choice)]
pub enum CertStatus {
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT")]
    Good(Null),
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", constructed = "true")]
    Revoked(RevokedInfo),
    #[asn1(context_specific = "2", tag_mode = "IMPLICIT")]
    Unknown(Null),
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct RevokedInfo {
    pub revocation_time: GeneralizedTime,
    #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
    pub revocation_reason: Option<Any>,
}

/// Build the SHA-1 `CertID` identifying `peer` under `issuer`.
///
/// # Errors
///
/// Returns `CertificateValidationError::Encoding` if the serial number cannot be encoded.
pub fn cert_id(peer: &Certificate, issuer: &Certificate) -> Result<CertId, CertificateValidationError> {
    let name_hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, issuer.subject_raw());
    let key_hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, issuer.public_key());

    Ok(CertId {
        hash_algorithm: AlgorithmIdentifier {
            algorithm: OID_SHA1,
            parameters: Some(Any::new(Tag::Null, Vec::<u8>::new())?),
        },
        issuer_name_hash: OctetString::new(name_hash.as_ref())?,
        issuer_key_hash: OctetString::new(key_hash.as_ref())?,
        serial_number: Int::new(peer.serial())?,
    })
}

/// DER encoded single-certificate OCSP request
///
/// # Errors
///
/// Returns `CertificateValidationError::Encoding` on encoding failure.
pub fn build_request(cert_id: &CertId) -> Result<Vec<u8>, CertificateValidationError> {
    let request = OcspRequest {
        tbs_request: TbsRequest {
            version: 0,
            request_list: vec![Request {
                req_cert: cert_id.clone(),
                single_request_extensions: None,
            }],
            request_extensions: None,
        },
    };
    Ok(request.to_der()?)
}

/// Evaluate a DER encoded OCSP response for `expected` at unix time `now`.
///
/// # Errors
///
/// Fails when the response is malformed, not `successful`, not signed by an authorised
/// responder, has no entry for the certificate, or is outside its validity window.
pub fn evaluate_response(
    body: &[u8],
    expected: &CertId,
    issuer: &Certificate,
    now: i64,
    clock_skew: Duration,
) -> Result<RevocationStatus, CertificateValidationError> {
    let malformed = |e: der::Error| CertificateValidationError::MalformedOcspResponse(e.to_string());

    let response = OcspResponse::from_der(body).map_err(malformed)?;
    if response.response_status != OcspResponseStatus::Successful {
        return Err(CertificateValidationError::OcspStatus(format!(
            "{:?}",
            response.response_status
        )));
    }

    let bytes = response.response_bytes.ok_or_else(|| {
        CertificateValidationError::MalformedOcspResponse("missing responseBytes".to_string())
    })?;
    if bytes.response_type != OID_PKIX_OCSP_BASIC {
        return Err(CertificateValidationError::MalformedOcspResponse(format!(
            "unsupported response type {}",
            bytes.response_type
        )));
    }

    let basic = BasicOcspResponse::from_der(bytes.response.as_bytes()).map_err(malformed)?;
    let tbs = basic.tbs_response_data.to_der()?;
    verify_response_signature(&basic, &tbs, issuer)?;

    let data = ResponseData::from_der(&tbs).map_err(malformed)?;
    let single = data
        .responses
        .iter()
        .find(|r| same_certificate(&r.cert_id, expected))
        .ok_or_else(|| {
            CertificateValidationError::MalformedOcspResponse(
                "response does not cover the requested certificate".to_string(),
            )
        })?;

    check_freshness(
        unix_seconds(&single.this_update),
        single.next_update.as_ref().map(unix_seconds),
        now,
        clock_skew,
    )?;

    Ok(match single.cert_status {
        CertStatus::Good(_) => RevocationStatus::Good,
        CertStatus::Revoked(_) => RevocationStatus::Revoked,
        CertStatus::Unknown(_) => RevocationStatus::Unknown,
    })
}

fn same_certificate(a: &CertId, b: &CertId) -> bool {
    a.hash_algorithm.algorithm == b.hash_algorithm.algorithm
        && a.issuer_name_hash == b.issuer_name_hash
        && a.issuer_key_hash == b.issuer_key_hash
        && a.serial_number.as_bytes() == b.serial_number.as_bytes()
}

fn unix_seconds(time: &GeneralizedTime) -> i64 {
    i64::try_from(time.to_unix_duration().as_secs()).unwrap_or(i64::MAX)
}

fn verify_response_signature(
    basic: &BasicOcspResponse,
    tbs: &[u8],
    issuer: &Certificate,
) -> Result<(), CertificateValidationError> {
    let signature = basic.signature.as_bytes().ok_or_else(|| {
        CertificateValidationError::Signature("signature BIT STRING has unused bits".to_string())
    })?;
    let algorithm = verification_algorithm(&basic.signature_algorithm.algorithm)?;

    if verify_with(algorithm, issuer.public_key(), tbs, signature) {
        return Ok(());
    }

    for responder in basic.certs.iter().flatten() {
        let der = responder.to_der()?;
        if let Some(key) = authorised_responder_key(&der, issuer) {
            if verify_with(algorithm, &key, tbs, signature) {
                debug!("OCSP response signed by delegated responder");
                return Ok(());
            }
        }
    }

    Err(CertificateValidationError::Signature(
        "OCSP response is not signed by the issuer or an authorised responder".to_string(),
    ))
}

/// Public key of a responder certificate issued by `issuer` for OCSP signing
fn authorised_responder_key(der: &[u8], issuer: &Certificate) -> Option<Vec<u8>> {
    let (_, responder) = X509Certificate::from_der(der).ok()?;
    let (_, issuer_cert) = X509Certificate::from_der(issuer.der()).ok()?;

    if responder.issuer().as_raw() != issuer.subject_raw() {
        return None;
    }
    responder.verify_signature(Some(issuer_cert.public_key())).ok()?;
    let eku = responder.extended_key_usage().ok()??;
    if !eku.value.ocsp_signing {
        return None;
    }
    Some(responder.public_key().subject_public_key.data.to_vec())
}

fn verification_algorithm(
    oid: &ObjectIdentifier,
) -> Result<&'static dyn signature::VerificationAlgorithm, CertificateValidationError> {
    let algorithm: &'static dyn signature::VerificationAlgorithm = match oid.to_string().as_str() {
        "1.2.840.113549.1.1.5" => &signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY,
        "1.2.840.113549.1.1.11" => &signature::RSA_PKCS1_2048_8192_SHA256,
        "1.2.840.113549.1.1.12" => &signature::RSA_PKCS1_2048_8192_SHA384,
        "1.2.840.113549.1.1.13" => &signature::RSA_PKCS1_2048_8192_SHA512,
        "1.2.840.10045.4.3.2" => &signature::ECDSA_P256_SHA256_ASN1,
        "1.2.840.10045.4.3.3" => &signature::ECDSA_P384_SHA384_ASN1,
        "1.3.101.112" => &signature::ED25519,
        other => {
            return Err(CertificateValidationError::Signature(format!(
                "unsupported OCSP signature algorithm {}",
                other
            )))
        }
    };
    Ok(algorithm)
}

fn verify_with(
    algorithm: &'static dyn signature::VerificationAlgorithm,
    public_key: &[u8],
    message: &[u8],
    sig: &[u8],
) -> bool {
    signature::UnparsedPublicKey::new(algorithm, public_key)
        .verify(message, sig)
        .is_ok()
}

/// Revocation validator querying the certificate's OCSP responder
#[derive(Debug, Clone)]
pub struct OcspValidator {
    transport: RevocationTransport,
    responder_url: Option<String>,
    clock_skew: Duration,
}

impl OcspValidator {
    /// `responder_url` is used only when the certificate has no AIA OCSP entry.
    pub fn new(transport: RevocationTransport, responder_url: Option<String>, clock_skew: Duration) -> Self {
        Self {
            transport,
            responder_url,
            clock_skew,
        }
    }

    fn responder_urls(&self, peer: &Certificate) -> Vec<String> {
        if peer.ocsp_urls().is_empty() {
            self.responder_url.iter().cloned().collect()
        } else {
            peer.ocsp_urls().to_vec()
        }
    }
}

#[async_trait]
impl RevocationValidator for OcspValidator {
    fn name(&self) -> &'static str {
        "OCSP"
    }

    async fn check_revocation_status(
        &self,
        peer: &Certificate,
        issuer: &Certificate,
    ) -> Result<RevocationStatus, CertificateValidationError> {
        let urls = self.responder_urls(peer);
        if urls.is_empty() {
            return Err(CertificateValidationError::MissingEndpoint("OCSP"));
        }

        let cert_id = cert_id(peer, issuer)?;
        let request = build_request(&cert_id)?;

        let query = async {
            let mut last_error = None;
            for url in &urls {
                debug!(url = %url, serial = %peer.serial_hex(), "Sending OCSP request");
                match self.transport.post(url, OCSP_REQUEST_CONTENT_TYPE, &request).await {
                    Ok(body) => {
                        return evaluate_response(&body, &cert_id, issuer, Utc::now().timestamp(), self.clock_skew);
                    }
                    Err(e) => {
                        warn!(url = %url, error = %e, "OCSP responder request failed");
                        last_error = Some(e);
                    }
                }
            }
            Err(last_error.unwrap_or(CertificateValidationError::MissingEndpoint("OCSP")))
        };

        self.transport.within_call_budget("OCSP responders", query).await
    }
}
