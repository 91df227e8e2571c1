//! Core signature types and data structures.
//!
//! This module defines the shared types for signing options, signature
//! dictionaries, and the structured verification report.

use chrono::{DateTime, Utc};
use der::asn1::ObjectIdentifier;
use serde::{Deserialize, Serialize};

use crate::chain::ChainCode;
use crate::oids;

/// Digest algorithm used for signing and verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    /// SHA-1 (deprecated, but still common in legacy PDFs)
    Sha1,
    /// SHA-256 (recommended)
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// Get the OID for this digest algorithm.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha1 => oids::ID_SHA1,
            DigestAlgorithm::Sha256 => oids::ID_SHA256,
            DigestAlgorithm::Sha384 => oids::ID_SHA384,
            DigestAlgorithm::Sha512 => oids::ID_SHA512,
        }
    }

    /// Resolve an algorithm from its OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        match *oid {
            o if o == oids::ID_SHA1 => Some(DigestAlgorithm::Sha1),
            o if o == oids::ID_SHA256 => Some(DigestAlgorithm::Sha256),
            o if o == oids::ID_SHA384 => Some(DigestAlgorithm::Sha384),
            o if o == oids::ID_SHA512 => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Output length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    /// Compute the digest of `data` with this algorithm.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        use sha1::Sha1;
        use sha2::{Digest, Sha256, Sha384, Sha512};
        match self {
            DigestAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// Signature sub-filter type (container encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignatureSubFilter {
    /// adbe.pkcs7.detached - PKCS#7 detached signature
    #[default]
    Pkcs7Detached,
    /// adbe.pkcs7.sha1 - PKCS#7 with SHA-1 digest
    Pkcs7Sha1,
    /// ETSI.CAdES.detached - PAdES CAdES signature
    CadesDetached,
    /// ETSI.RFC3161 - Timestamp token
    Rfc3161,
}

impl SignatureSubFilter {
    /// Get the PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> &'static str {
        match self {
            SignatureSubFilter::Pkcs7Detached => "adbe.pkcs7.detached",
            SignatureSubFilter::Pkcs7Sha1 => "adbe.pkcs7.sha1",
            SignatureSubFilter::CadesDetached => "ETSI.CAdES.detached",
            SignatureSubFilter::Rfc3161 => "ETSI.RFC3161",
        }
    }

    /// Parse a PDF name into a sub-filter type.
    pub fn from_pdf_name(name: &str) -> Option<Self> {
        match name {
            "adbe.pkcs7.detached" => Some(SignatureSubFilter::Pkcs7Detached),
            "adbe.pkcs7.sha1" => Some(SignatureSubFilter::Pkcs7Sha1),
            "ETSI.CAdES.detached" => Some(SignatureSubFilter::CadesDetached),
            "ETSI.RFC3161" => Some(SignatureSubFilter::Rfc3161),
            _ => None,
        }
    }

    /// Whether this sub-filter denotes a pure RFC 3161 timestamp container.
    pub fn is_timestamp(&self) -> bool {
        matches!(self, SignatureSubFilter::Rfc3161)
    }
}

/// Certification (MDP) level declared through a `/Reference` DocMDP
/// transform. A signature carrying one is a certification signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificationLevel {
    /// No changes allowed after certification (P=1)
    NoChanges,
    /// Form fill-in and signing allowed (P=2)
    FormFilling,
    /// Form fill-in, signing and annotations allowed (P=3)
    FormFillingAndAnnotations,
}

impl CertificationLevel {
    /// The `/P` access-permissions value for this level.
    pub fn permission_value(&self) -> i64 {
        match self {
            CertificationLevel::NoChanges => 1,
            CertificationLevel::FormFilling => 2,
            CertificationLevel::FormFillingAndAnnotations => 3,
        }
    }

    /// Resolve a level from its `/P` value.
    pub fn from_permission_value(p: i64) -> Option<Self> {
        match p {
            1 => Some(CertificationLevel::NoChanges),
            2 => Some(CertificationLevel::FormFilling),
            3 => Some(CertificationLevel::FormFillingAndAnnotations),
            _ => None,
        }
    }
}

/// Options for signing a document.
#[derive(Debug, Clone)]
pub struct SignOptions {
    /// Name of the signature field to create
    pub field_name: String,
    /// Signature sub-filter (container encoding)
    pub sub_filter: SignatureSubFilter,
    /// Reason for signing
    pub reason: Option<String>,
    /// Location where the document was signed
    pub location: Option<String>,
    /// Contact information
    pub contact_info: Option<String>,
    /// Name of the signer (if different from certificate CN)
    pub name: Option<String>,
    /// Signing time written to the dictionary `/M` entry
    pub signing_time: Option<DateTime<Utc>>,
    /// Certification (MDP) level; `None` produces a plain approval signature
    pub certification: Option<CertificationLevel>,
    /// Reserved container size in bytes (each byte costs two hex digits)
    pub container_size: usize,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            field_name: "Signature1".to_string(),
            sub_filter: SignatureSubFilter::Pkcs7Detached,
            reason: None,
            location: None,
            contact_info: None,
            name: None,
            signing_time: None,
            certification: None,
            container_size: 8192, // Conservative default for signature size
        }
    }
}

impl SignOptions {
    /// Set the signature field name.
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the dictionary signing time.
    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = Some(time);
        self
    }

    /// Turn the signature into a certification signature at the given level.
    pub fn with_certification(mut self, level: CertificationLevel) -> Self {
        self.certification = Some(level);
        self
    }

    /// Override the reserved container size in bytes.
    pub fn with_container_size(mut self, size: usize) -> Self {
        self.container_size = size;
        self
    }
}

/// Information extracted from an existing signature dictionary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignatureInfo {
    /// Name of the signature field (`/T`)
    pub field_name: Option<String>,
    /// Name of the signer (`/Name`)
    pub signer_name: Option<String>,
    /// Dictionary signing time (`/M`, PDF date string)
    pub signing_time: Option<String>,
    /// Reason for signing
    pub reason: Option<String>,
    /// Signing location
    pub location: Option<String>,
    /// Contact information
    pub contact_info: Option<String>,
    /// Signature sub-filter type
    pub sub_filter: Option<SignatureSubFilter>,
    /// Byte range of the signed data
    pub byte_range: Vec<i64>,
    /// Certification level, when a DocMDP `/Reference` transform is present
    pub certification: Option<CertificationLevel>,
    /// Whether the signature covers the whole document
    pub covers_whole_document: bool,
}

/// What kind of signature a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignatureKind {
    /// Ordinary approval signature
    #[default]
    Signature,
    /// Certification signature (declares an MDP transform)
    Certified,
    /// Document timestamp (pure RFC 3161 container)
    Timestamp,
}

/// Where a derived signing time came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningTimeSource {
    /// genTime of an embedded RFC 3161 timestamp
    Timestamp,
    /// signing-time signed attribute (self-asserted, lower trust)
    SignedAttribute,
}

/// Tri-state outcome of the document modification check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModificationVerdict {
    /// Signed spans hash to the signed digest
    NotModified,
    /// Signed spans no longer match the signature
    Modified,
    /// The check itself could not be carried out
    Error,
}

/// Tri-state outcome of the signer identity check.
///
/// `Unknown` means the signer certificate could not be resolved at all and
/// must never be collapsed into `NotVerified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityVerdict {
    /// Chain builds to a trusted anchor
    Verified,
    /// Chain building concluded the signer is not trustworthy
    NotVerified,
    /// The signer certificate could not be resolved
    Unknown,
}

/// Severity of a verification state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational only
    Info,
    /// Suspicious but not conclusive
    Warn,
    /// Check passed
    Valid,
    /// Check failed
    Invalid,
}

/// Typed payload of a verification state, one variant per check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum StateDetail {
    /// The document or field could not be resolved at all
    DocumentCorrupted {
        /// Underlying failure
        reason: String,
    },
    /// The CMS container did not parse
    ContainerParse {
        /// Underlying failure
        reason: String,
    },
    /// The container did not hold exactly one signer
    SignerCount {
        /// Number of signer-infos found
        count: usize,
    },
    /// A signing time was derived
    SigningTime {
        /// The derived time
        time: DateTime<Utc>,
        /// Where it came from
        source: SigningTimeSource,
    },
    /// The signature was classified
    SignatureType {
        /// Classified kind
        kind: SignatureKind,
    },
    /// ByteRange / document structure formatting check
    Formatting {
        /// What deviated
        problem: String,
    },
    /// Document modification check
    DocumentModification {
        /// Tri-state outcome
        verdict: ModificationVerdict,
        /// Diagnostic detail for `Modified` / `Error`
        reason: Option<String>,
    },
    /// Long-term validation material detection
    Ltv {
        /// Whether any revocation material is embedded
        enabled: bool,
    },
    /// Signer identity / trust chain check
    Identity {
        /// Tri-state outcome
        verdict: IdentityVerdict,
        /// Chain builder result code, when a chain was attempted
        chain_code: Option<ChainCode>,
        /// Subject of the resolved signer certificate
        subject: Option<String>,
        /// Diagnostic detail
        reason: Option<String>,
    },
    /// Trustworthiness of the embedded timestamp itself
    TimestampTrust {
        /// genTime of the timestamp under examination
        gen_time: Option<DateTime<Utc>>,
        /// Chain builder result for the timestamp signer
        chain_code: Option<ChainCode>,
        /// Diagnostic detail
        reason: Option<String>,
    },
}

impl StateDetail {
    /// Stable identifier of the check this state belongs to.
    pub fn code(&self) -> &'static str {
        match self {
            StateDetail::DocumentCorrupted { .. } => "document_corrupted",
            StateDetail::ContainerParse { .. } => "container_parse",
            StateDetail::SignerCount { .. } => "signer_count",
            StateDetail::SigningTime { .. } => "signing_time",
            StateDetail::SignatureType { .. } => "signature_type",
            StateDetail::Formatting { .. } => "formatting",
            StateDetail::DocumentModification { .. } => "document_modification",
            StateDetail::Ltv { .. } => "ltv",
            StateDetail::Identity { .. } => "identity",
            StateDetail::TimestampTrust { .. } => "timestamp_trust",
        }
    }
}

/// One entry of the verification report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureState {
    /// How severe the finding is
    pub severity: Severity,
    /// The typed finding itself
    #[serde(flatten)]
    pub detail: StateDetail,
}

impl SignatureState {
    /// Build an informational state.
    pub fn info(detail: StateDetail) -> Self {
        Self {
            severity: Severity::Info,
            detail,
        }
    }

    /// Build a warning state.
    pub fn warn(detail: StateDetail) -> Self {
        Self {
            severity: Severity::Warn,
            detail,
        }
    }

    /// Build a passing state.
    pub fn valid(detail: StateDetail) -> Self {
        Self {
            severity: Severity::Valid,
            detail,
        }
    }

    /// Build a failing state.
    pub fn invalid(detail: StateDetail) -> Self {
        Self {
            severity: Severity::Invalid,
            detail,
        }
    }
}

/// Complete result of verifying one signature field.
///
/// This is an accumulator: the orchestrator appends states as it walks its
/// fixed sequence and derives the scalar fields at the end. It is always
/// fully populated, whatever failed along the way.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignatureVerifyResult {
    /// Name of the signature field this report belongs to
    pub field_name: Option<String>,
    /// Every state the orchestrator appended, in check order
    pub states: Vec<SignatureState>,
    /// Overall verdict: modification check passed and identity verified
    pub verification_result: bool,
    /// DER of the resolved signer certificate, when resolution succeeded
    pub signer_certificate: Option<Vec<u8>>,
    /// Subject DN of the resolved signer certificate
    pub signer_subject: Option<String>,
    /// Best known signing time (timestamp preferred over self-asserted)
    pub signing_time: Option<DateTime<Utc>>,
    /// Classified signature kind
    pub signature_kind: SignatureKind,
    /// Whether long-term validation material is embedded
    pub is_ltv: bool,
}

impl SignatureVerifyResult {
    /// Append a state.
    pub(crate) fn push(&mut self, state: SignatureState) {
        log::debug!("verify state [{:?}] {}", state.severity, state.detail.code());
        self.states.push(state);
    }

    /// Find the first state for a given check code.
    pub fn state(&self, code: &str) -> Option<&SignatureState> {
        self.states.iter().find(|s| s.detail.code() == code)
    }

    /// Whether any state was recorded at `Invalid` severity.
    pub fn has_invalid(&self) -> bool {
        self.states.iter().any(|s| s.severity == Severity::Invalid)
    }
}
