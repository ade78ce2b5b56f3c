use crate::error::TrustError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of a single revocation check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationStatus {
    Good,
    Revoked,
    Unknown,
}

impl RevocationStatus {
    /// Good and Revoked end the chain; Unknown moves on to the next validator.
    pub fn is_conclusive(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Revocation validator kinds that can appear in the priority map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationValidatorType {
    Ocsp,
    Crl,
}

impl RevocationValidatorType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ocsp => "OCSP",
            Self::Crl => "CRL",
        }
    }
}

impl fmt::Display for RevocationValidatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevocationValidatorType {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ocsp" => Ok(Self::Ocsp),
            "crl" => Ok(Self::Crl),
            _ => Err(TrustError::Configuration(format!(
                "Unknown revocation validator type: {}. Valid options: OCSP, CRL",
                s
            ))),
        }
    }
}

/// PSD2 roles a TPP can be authorised for.
///
/// The short code (`as_str`) is the external serialization; certificate role matching uses the
/// enumerant name (`name`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Psd2Role {
    #[serde(rename = "aisp")]
    Aisp,
    #[serde(rename = "pisp")]
    Pisp,
    #[serde(rename = "cbpii")]
    Cbpii,
    #[serde(rename = "aspsp")]
    Aspsp,
    #[serde(rename = "psp_ai")]
    PspAi,
    #[serde(rename = "psp_pi")]
    PspPi,
    #[serde(rename = "psp_ic")]
    PspIc,
    #[serde(rename = "psp_as")]
    PspAs,
}

impl Psd2Role {
    pub const ALL: [Psd2Role; 8] = [
        Psd2Role::Aisp,
        Psd2Role::Pisp,
        Psd2Role::Cbpii,
        Psd2Role::Aspsp,
        Psd2Role::PspAi,
        Psd2Role::PspPi,
        Psd2Role::PspIc,
        Psd2Role::PspAs,
    ];

    /// Canonical lowercase short code
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aisp => "aisp",
            Self::Pisp => "pisp",
            Self::Cbpii => "cbpii",
            Self::Aspsp => "aspsp",
            Self::PspAi => "psp_ai",
            Self::PspPi => "psp_pi",
            Self::PspIc => "psp_ic",
            Self::PspAs => "psp_as",
        }
    }

    /// Enumerant name, as it appears in the certificate role set
    pub fn name(self) -> &'static str {
        match self {
            Self::Aisp => "AISP",
            Self::Pisp => "PISP",
            Self::Cbpii => "CBPII",
            Self::Aspsp => "ASPSP",
            Self::PspAi => "PSP_AI",
            Self::PspPi => "PSP_PI",
            Self::PspIc => "PSP_IC",
            Self::PspAs => "PSP_AS",
        }
    }

    /// Look a role up by its short code, ignoring case.
    ///
    /// Returns `None` for unmatched input; use `str::parse` for an error instead.
    pub fn from_value(text: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(text))
    }
}

impl fmt::Display for Psd2Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Psd2Role {
    type Err = TrustError;

    /// Accepts either the short code or the enumerant name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_value(s)
            .or_else(|| Self::ALL.into_iter().find(|role| role.name() == s))
            .ok_or_else(|| TrustError::Validation(format!("Unknown PSD2 role: {}", s)))
    }
}

/// Regulatory content recovered from an eIDAS QWAC/QSealC certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateContent {
    /// PSP authorisation number from the subject organizationIdentifier
    pub psp_authorisation_number: Option<String>,
    /// Role names asserted by the certificate, in declaration order
    pub psp_roles: Vec<String>,
    /// Name of the National Competent Authority
    pub nca_name: String,
    /// Identifier of the National Competent Authority
    pub nca_id: String,
    /// Subject common name
    pub name: Option<String>,
}

impl CertificateContent {
    pub fn has_role(&self, role: Psd2Role) -> bool {
        self.psp_roles.iter().any(|r| r == role.name())
    }
}
