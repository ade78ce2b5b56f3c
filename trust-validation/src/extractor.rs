//! eIDAS PSD2 certificate content extraction
//!
//! PSD2 roles live in the qcStatements extension (RFC 3739) as the ETSI TS 119 495
//! `PSD2QcType` statement:
//!
//! ```text
//! PSD2QcType ::= SEQUENCE {
//!     rolesOfPSP  RolesOfPSP,
//!     nCAName     NCAName,
//!     nCAId       NCAId }
//!
//! RolesOfPSP ::= SEQUENCE OF RoleOfPSP
//!
//! RoleOfPSP ::= SEQUENCE {
//!     roleOfPspOid   RoleOfPspOid,
//!     roleOfPspName  RoleOfPspName }
//! ```

use crate::certificate::Certificate;
use crate::error::{Result, TrustError};
use crate::models::CertificateContent;
use der::asn1::{Any, ObjectIdentifier};
use der::{Decode, Encode, Sequence};
use tracing::debug;

/// qcStatements certificate extension
pub const OID_QC_STATEMENTS: &str = "1.3.6.1.5.5.7.1.3";
/// ETSI PSD2 QC statement identifier
pub const OID_PSD2_QC_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("0.4.0.19495.2");

pub const OID_ROLE_PSP_AS: ObjectIdentifier = ObjectIdentifier::new_unwrap("0.4.0.19495.1.1");
pub const OID_ROLE_PSP_PI: ObjectIdentifier = ObjectIdentifier::new_unwrap("0.4.0.19495.1.2");
pub const OID_ROLE_PSP_AI: ObjectIdentifier = ObjectIdentifier::new_unwrap("0.4.0.19495.1.3");
pub const OID_ROLE_PSP_IC: ObjectIdentifier = ObjectIdentifier::new_unwrap("0.4.0.19495.1.4");

/// One entry of the qcStatements SEQUENCE OF
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct QcStatement {
    pub statement_id: ObjectIdentifier,
    pub statement_info: Option<Any>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct Psd2QcType {
    pub roles_of_psp: Vec<RoleOfPsp>,
    pub nca_name: String,
    pub nca_id: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct RoleOfPsp {
    pub role_of_psp_oid: ObjectIdentifier,
    pub role_of_psp_name: String,
}

/// Role OID -> (ETSI role name, legacy PSD2 role name)
const KNOWN_ROLES: [(ObjectIdentifier, &str, &str); 4] = [
    (OID_ROLE_PSP_AS, "PSP_AS", "ASPSP"),
    (OID_ROLE_PSP_PI, "PSP_PI", "PISP"),
    (OID_ROLE_PSP_AI, "PSP_AI", "AISP"),
    (OID_ROLE_PSP_IC, "PSP_IC", "CBPII"),
];

fn role_names(oid: &ObjectIdentifier) -> Option<(&'static str, &'static str)> {
    KNOWN_ROLES
        .iter()
        .find(|(known, _, _)| known == oid)
        .map(|(_, etsi, legacy)| (*etsi, *legacy))
}

pub struct CertificateContentExtractor;

impl CertificateContentExtractor {
    /// Extract the PSD2 content of an eIDAS certificate.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::CertificateContent` when the qcStatements extension or the PSD2
    /// statement is missing, malformed, or declares no roles.
    pub fn extract(cert: &Certificate) -> Result<CertificateContent> {
        let qc_statements = cert.extension(OID_QC_STATEMENTS).ok_or_else(|| {
            TrustError::CertificateContent(
                "Certificate does not contain the qcStatements extension".to_string(),
            )
        })?;

        let psd2 = Self::parse_psd2_statement(qc_statements)?;

        if psd2.roles_of_psp.is_empty() {
            return Err(TrustError::CertificateContent(
                "PSD2 QC statement does not declare any PSP role".to_string(),
            ));
        }

        let mut psp_roles: Vec<String> = Vec::new();
        for role in &psd2.roles_of_psp {
            let names: Vec<&str> = match role_names(&role.role_of_psp_oid) {
                Some((etsi, legacy)) => vec![etsi, legacy],
                None => vec![role.role_of_psp_name.as_str()],
            };
            for name in names {
                if !psp_roles.iter().any(|r| r == name) {
                    psp_roles.push(name.to_string());
                }
            }
        }

        debug!(
            roles = ?psp_roles,
            nca_id = %psd2.nca_id,
            "Extracted PSD2 content from eIDAS certificate"
        );

        Ok(CertificateContent {
            psp_authorisation_number: cert.organization_identifier().map(str::to_string),
            psp_roles,
            nca_name: psd2.nca_name,
            nca_id: psd2.nca_id,
            name: cert.common_name().map(str::to_string),
        })
    }

    fn parse_psd2_statement(qc_statements: &[u8]) -> Result<Psd2QcType> {
        let statements = Vec::<QcStatement>::from_der(qc_statements).map_err(|e| {
            TrustError::CertificateContent(format!("Malformed qcStatements extension: {}", e))
        })?;

        let info = statements
            .into_iter()
            .find(|s| s.statement_id == OID_PSD2_QC_TYPE)
            .ok_or_else(|| {
                TrustError::CertificateContent(
                    "Certificate does not contain a PSD2 QC statement".to_string(),
                )
            })?
            .statement_info
            .ok_or_else(|| {
                TrustError::CertificateContent("PSD2 QC statement has no content".to_string())
            })?;

        info.to_der()
            .and_then(|bytes| Psd2QcType::from_der(&bytes))
            .map_err(|e| {
                TrustError::CertificateContent(format!("Malformed PSD2 QC statement: {}", e))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qc_statements(roles: &[(ObjectIdentifier, &str)]) -> Vec<u8> {
        let psd2 = Psd2QcType {
            roles_of_psp: roles
                .iter()
                .map(|(oid, name)| RoleOfPsp {
                    role_of_psp_oid: *oid,
                    role_of_psp_name: (*name).to_string(),
                })
                .collect(),
            nca_name: "Financial Conduct Authority".to_string(),
            nca_id: "GB-FCA".to_string(),
        };
        vec![QcStatement {
            statement_id: OID_PSD2_QC_TYPE,
            statement_info: Some(Any::encode_from(&psd2).unwrap()),
        }]
        .to_der()
        .unwrap()
    }

    fn certificate_with(extension: Option<Vec<u8>>) -> Certificate {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["tpp.example".to_string()]).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, "Example TPP");
        if let Some(content) = extension {
            params
                .custom_extensions
                .push(rcgen::CustomExtension::from_oid_content(&[1, 3, 6, 1, 5, 5, 7, 1, 3], content));
        }
        let generated = params.self_signed(&key).unwrap();
        Certificate::from_der(generated.der()).unwrap()
    }

    #[test]
    fn test_extracts_roles_and_nca() {
        let cert = certificate_with(Some(qc_statements(&[
            (OID_ROLE_PSP_AI, "PSP_AI"),
            (OID_ROLE_PSP_PI, "PSP_PI"),
        ])));
        let content = CertificateContentExtractor::extract(&cert).unwrap();
        assert_eq!(content.psp_roles, vec!["PSP_AI", "AISP", "PSP_PI", "PISP"]);
        assert_eq!(content.nca_id, "GB-FCA");
        assert_eq!(content.nca_name, "Financial Conduct Authority");
        assert_eq!(content.name.as_deref(), Some("Example TPP"));
    }

    #[test]
    fn test_unknown_role_oid_keeps_declared_name() {
        let custom = ObjectIdentifier::new_unwrap("1.2.3.4");
        let cert = certificate_with(Some(qc_statements(&[(custom, "PSP_XX")])));
        let content = CertificateContentExtractor::extract(&cert).unwrap();
        assert_eq!(content.psp_roles, vec!["PSP_XX"]);
    }

    #[test]
    fn test_missing_extension_is_an_error() {
        let cert = certificate_with(None);
        let err = CertificateContentExtractor::extract(&cert).unwrap_err();
        assert!(matches!(err, TrustError::CertificateContent(msg) if msg.contains("qcStatements")));
    }

    #[test]
    fn test_malformed_extension_is_an_error() {
        let cert = certificate_with(Some(vec![0x30, 0x03, 0x02, 0x01]));
        let err = CertificateContentExtractor::extract(&cert).unwrap_err();
        assert!(matches!(err, TrustError::CertificateContent(msg) if msg.contains("Malformed")));
    }

    #[test]
    fn test_empty_role_list_is_an_error() {
        let cert = certificate_with(Some(qc_statements(&[])));
        assert!(matches!(
            CertificateContentExtractor::extract(&cert),
            Err(TrustError::CertificateContent(_))
        ));
    }

    #[test]
    fn test_statement_without_psd2_entry_is_an_error() {
        // QcCompliance statement only
        let statements = vec![QcStatement {
            statement_id: ObjectIdentifier::new_unwrap("0.4.0.1862.1.1"),
            statement_info: None,
        }]
        .to_der()
        .unwrap();
        let cert = certificate_with(Some(statements));
        let err = CertificateContentExtractor::extract(&cert).unwrap_err();
        assert!(matches!(err, TrustError::CertificateContent(msg) if msg.contains("PSD2")));
    }
}
