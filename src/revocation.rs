//! Revocation evidence models: CRLs and OCSP responses.
//!
//! Both are immutable value objects whose identity is their raw encoded
//! bytes; that byte-exact equality is what the DSS relies on for
//! deduplication. Parsing keeps the raw encoding alongside the derived
//! fields, and `serialize` hands the canonical bytes back out.

use chrono::{DateTime, TimeZone, Utc};
use der::asn1::{BitString, GeneralizedTime, Int, Null, ObjectIdentifier, OctetString};
use der::{Any, Choice, Decode, Enumerated, Sequence};
use spki::AlgorithmIdentifierOwned;
use x509_parser::prelude::*;

use crate::error::{Error, Result};
use crate::oids;

/// Parsed certificate revocation list.
///
/// Owns its raw DER; equality is byte-exact equality of that encoding.
#[derive(Debug, Clone)]
pub struct Crl {
    raw: Vec<u8>,
    issuer: String,
    issuer_der: Vec<u8>,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
    revoked: Vec<RevokedEntry>,
}

#[derive(Debug, Clone)]
struct RevokedEntry {
    serial: Vec<u8>,
    revocation_date: DateTime<Utc>,
}

impl Crl {
    /// Parse a DER-encoded CRL.
    pub fn parse(bytes: &[u8]) -> Result<Crl> {
        let (rem, crl) = CertificateRevocationList::from_der(bytes)
            .map_err(|e| Error::parse("CRL", e.to_string()))?;
        if !rem.is_empty() {
            return Err(Error::parse("CRL", "trailing bytes after CRL"));
        }

        let revoked = crl
            .iter_revoked_certificates()
            .map(|rc| {
                Ok(RevokedEntry {
                    serial: rc.raw_serial().to_vec(),
                    revocation_date: asn1_time_to_chrono(&rc.revocation_date)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let next_update = match crl.next_update() {
            Some(t) => Some(asn1_time_to_chrono(&t)?),
            None => None,
        };

        Ok(Crl {
            raw: bytes.to_vec(),
            issuer: crl.issuer().to_string(),
            issuer_der: crl.issuer().as_raw().to_vec(),
            this_update: asn1_time_to_chrono(&crl.last_update())?,
            next_update,
            revoked,
        })
    }

    /// The canonical encoded bytes.
    pub fn serialize(&self) -> &[u8] {
        &self.raw
    }

    /// Issuer distinguished name, rendered.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Raw DER of the issuer name, for exact DN matching.
    pub fn issuer_der(&self) -> &[u8] {
        &self.issuer_der
    }

    /// thisUpdate of the list.
    pub fn this_update(&self) -> DateTime<Utc> {
        self.this_update
    }

    /// nextUpdate of the list, when declared.
    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.next_update
    }

    /// Number of revoked entries carried.
    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }

    /// Revocation date of `serial`, if this list revokes it.
    pub fn revocation_of(&self, serial: &[u8]) -> Option<DateTime<Utc>> {
        self.revoked
            .iter()
            .find(|e| serial_eq(&e.serial, serial))
            .map(|e| e.revocation_date)
    }
}

impl PartialEq for Crl {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Crl {}

// --- OCSP (RFC 6960), modelled with der derives -------------------------

/// OCSP response status (RFC 6960 Section 2.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Enumerated)]
#[asn1(type = "ENUMERATED")]
#[repr(u32)]
pub enum OcspResponseStatus {
    /// Response has valid confirmations
    Successful = 0,
    /// Illegal confirmation request
    MalformedRequest = 1,
    /// Internal error in issuer
    InternalError = 2,
    /// Try again later
    TryLater = 3,
    /// Must sign the request
    SigRequired = 5,
    /// Request unauthorized
    Unauthorized = 6,
}

#[derive(Clone, Debug, Sequence)]
struct OcspResponseRaw {
    response_status: OcspResponseStatus,
    #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
    response_bytes: Option<ResponseBytes>,
}

#[derive(Clone, Debug, Sequence)]
struct ResponseBytes {
    response_type: ObjectIdentifier,
    response: OctetString,
}

#[derive(Clone, Debug, Sequence)]
struct BasicOcspResponse {
    tbs_response_data: ResponseData,
    signature_algorithm: AlgorithmIdentifierOwned,
    signature: BitString,
    #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
    certs: Option<Any>,
}

fn default_version() -> u8 {
    0
}

#[derive(Clone, Debug, Sequence)]
struct ResponseData {
    #[asn1(
        context_specific = "0",
        default = "default_version",
        tag_mode = "EXPLICIT"
    )]
    version: u8,
    responder_id: ResponderId,
    produced_at: GeneralizedTime,
    responses: Vec<SingleResponse>,
    #[asn1(context_specific = "1", optional = "true", tag_mode = "EXPLICIT")]
    response_extensions: Option<Any>,
}

#[derive(Clone, Debug, Choice)]
enum ResponderId {
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", constructed = "true")]
    ByName(Any),
    #[asn1(context_specific = "2", tag_mode = "EXPLICIT", constructed = "true")]
    ByKey(OctetString),
}

#[derive(Clone, Debug, Sequence)]
struct SingleResponse {
    cert_id: CertId,
    cert_status: CertStatusRaw,
    this_update: GeneralizedTime,
    #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
    next_update: Option<GeneralizedTime>,
    #[asn1(context_specific = "1", optional = "true", tag_mode = "EXPLICIT")]
    single_extensions: Option<Any>,
}

#[derive(Clone, Debug, Sequence)]
struct CertId {
    hash_algorithm: AlgorithmIdentifierOwned,
    issuer_name_hash: OctetString,
    issuer_key_hash: OctetString,
    serial_number: Int,
}

#[derive(Clone, Debug, Choice)]
enum CertStatusRaw {
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT")]
    Good(Null),
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", constructed = "true")]
    Revoked(RevokedInfo),
    #[asn1(context_specific = "2", tag_mode = "IMPLICIT")]
    Unknown(Null),
}

#[derive(Clone, Debug, Sequence)]
struct RevokedInfo {
    revocation_time: GeneralizedTime,
    #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
    revocation_reason: Option<Any>,
}

/// Certificate status reported by one OCSP single response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcspCertStatus {
    /// Certificate is not revoked
    Good,
    /// Certificate has been revoked
    Revoked {
        /// When the revocation took effect
        time: DateTime<Utc>,
    },
    /// Responder does not know the certificate
    Unknown,
}

/// Parsed OCSP response.
///
/// Owns its raw DER; equality is byte-exact equality of that encoding.
#[derive(Debug, Clone)]
pub struct Ocsp {
    raw: Vec<u8>,
    status: OcspResponseStatus,
    produced_at: Option<DateTime<Utc>>,
    entries: Vec<(Vec<u8>, OcspCertStatus)>,
}

impl Ocsp {
    /// Parse a DER-encoded OCSPResponse.
    pub fn parse(bytes: &[u8]) -> Result<Ocsp> {
        let outer = OcspResponseRaw::from_der(bytes)
            .map_err(|e| Error::parse("OCSP response", e.to_string()))?;

        let mut produced_at = None;
        let mut entries = Vec::new();

        if let Some(rb) = &outer.response_bytes {
            if rb.response_type != oids::ID_PKIX_OCSP_BASIC {
                return Err(Error::parse(
                    "OCSP response",
                    format!("unsupported response type {}", rb.response_type),
                ));
            }
            let basic = BasicOcspResponse::from_der(rb.response.as_bytes())
                .map_err(|e| Error::parse("OCSP basic response", e.to_string()))?;

            produced_at = Some(generalized_time_to_chrono(
                &basic.tbs_response_data.produced_at,
            ));

            for single in &basic.tbs_response_data.responses {
                let status = match &single.cert_status {
                    CertStatusRaw::Good(_) => OcspCertStatus::Good,
                    CertStatusRaw::Revoked(info) => OcspCertStatus::Revoked {
                        time: generalized_time_to_chrono(&info.revocation_time),
                    },
                    CertStatusRaw::Unknown(_) => OcspCertStatus::Unknown,
                };
                entries.push((single.cert_id.serial_number.as_bytes().to_vec(), status));
            }
        }

        Ok(Ocsp {
            raw: bytes.to_vec(),
            status: outer.response_status,
            produced_at,
            entries,
        })
    }

    /// The canonical encoded bytes.
    pub fn serialize(&self) -> &[u8] {
        &self.raw
    }

    /// Top-level response status.
    pub fn status(&self) -> OcspResponseStatus {
        self.status
    }

    /// When the responder produced this response.
    pub fn produced_at(&self) -> Option<DateTime<Utc>> {
        self.produced_at
    }

    /// Status for a certificate serial, if this response covers it.
    pub fn status_for_serial(&self, serial: &[u8]) -> Option<&OcspCertStatus> {
        self.entries
            .iter()
            .find(|(s, _)| serial_eq(s, serial))
            .map(|(_, status)| status)
    }
}

impl PartialEq for Ocsp {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Ocsp {}

/// Revocation evidence: a CRL or an OCSP response. Closed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationEvidence {
    /// Certificate revocation list
    Crl(Crl),
    /// OCSP response
    Ocsp(Ocsp),
}

impl RevocationEvidence {
    /// The canonical encoded bytes of the evidence.
    pub fn serialize(&self) -> &[u8] {
        match self {
            RevocationEvidence::Crl(crl) => crl.serialize(),
            RevocationEvidence::Ocsp(ocsp) => ocsp.serialize(),
        }
    }
}

/// What a blob of DER turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DssObjectKind {
    /// X.509 certificate
    Certificate,
    /// Certificate revocation list
    Crl,
    /// OCSP response
    Ocsp,
}

/// Classify a DER blob as certificate, CRL or OCSP response by attempting
/// each parse in that order. Returns `None` if none succeed.
pub fn classify(bytes: &[u8]) -> Option<DssObjectKind> {
    if let Ok((rem, _)) = X509Certificate::from_der(bytes) {
        if rem.is_empty() {
            return Some(DssObjectKind::Certificate);
        }
    }
    if Crl::parse(bytes).is_ok() {
        return Some(DssObjectKind::Crl);
    }
    if Ocsp::parse(bytes).is_ok() {
        return Some(DssObjectKind::Ocsp);
    }
    None
}

/// Compare two INTEGER serials, ignoring leading zero octets (different
/// encoders keep or strip the sign byte).
pub(crate) fn serial_eq(a: &[u8], b: &[u8]) -> bool {
    strip_leading_zeros(a) == strip_leading_zeros(b)
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let mut i = 0;
    while i + 1 < bytes.len() && bytes[i] == 0 {
        i += 1;
    }
    &bytes[i..]
}

/// Convert an x509-parser ASN.1 time to chrono.
pub(crate) fn asn1_time_to_chrono(time: &ASN1Time) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(time.timestamp(), 0)
        .single()
        .ok_or_else(|| Error::parse("ASN.1 time", "timestamp out of range"))
}

/// Convert a der GeneralizedTime to chrono.
pub(crate) fn generalized_time_to_chrono(time: &GeneralizedTime) -> DateTime<Utc> {
    let duration = time.to_unix_duration();
    Utc.timestamp_opt(duration.as_secs() as i64, duration.subsec_nanos())
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CRL_DER: &[u8] = include_bytes!("../tests/fixtures/crl.der");
    const OCSP_GOOD: &[u8] = include_bytes!("../tests/fixtures/ocsp_good.der");
    const OCSP_REVOKED: &[u8] = include_bytes!("../tests/fixtures/ocsp_revoked.der");
    const ROOT_DER: &[u8] = include_bytes!("../tests/fixtures/root.der");

    #[test]
    fn test_parse_crl() {
        let crl = Crl::parse(CRL_DER).unwrap();
        assert!(crl.issuer().contains("Signet Test Root CA"));
        assert_eq!(crl.revoked_count(), 1);
        // serial 0x1002 is revoked, 0x1001 is not
        assert!(crl.revocation_of(&[0x10, 0x02]).is_some());
        assert!(crl.revocation_of(&[0x10, 0x01]).is_none());
    }

    #[test]
    fn test_crl_round_trip_and_equality() {
        let a = Crl::parse(CRL_DER).unwrap();
        let b = Crl::parse(CRL_DER).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.serialize(), CRL_DER);
    }

    #[test]
    fn test_parse_ocsp_good() {
        let ocsp = Ocsp::parse(OCSP_GOOD).unwrap();
        assert_eq!(ocsp.status(), OcspResponseStatus::Successful);
        assert!(ocsp.produced_at().is_some());
        assert_eq!(
            ocsp.status_for_serial(&[0x10, 0x01]),
            Some(&OcspCertStatus::Good)
        );
    }

    #[test]
    fn test_parse_ocsp_revoked() {
        let ocsp = Ocsp::parse(OCSP_REVOKED).unwrap();
        match ocsp.status_for_serial(&[0x10, 0x02]) {
            Some(OcspCertStatus::Revoked { time }) => {
                assert!(time.timestamp() > 0);
            }
            other => panic!("expected revoked status, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_order() {
        assert_eq!(classify(ROOT_DER), Some(DssObjectKind::Certificate));
        assert_eq!(classify(CRL_DER), Some(DssObjectKind::Crl));
        assert_eq!(classify(OCSP_GOOD), Some(DssObjectKind::Ocsp));
        assert_eq!(classify(b"not der at all"), None);
    }

    #[test]
    fn test_serial_eq_ignores_sign_byte() {
        assert!(serial_eq(&[0x00, 0x80, 0x01], &[0x80, 0x01]));
        assert!(serial_eq(&[0x10, 0x01], &[0x10, 0x01]));
        assert!(!serial_eq(&[0x10, 0x01], &[0x10, 0x02]));
    }

    #[test]
    fn test_evidence_equality_is_byte_exact() {
        let a = RevocationEvidence::Crl(Crl::parse(CRL_DER).unwrap());
        let b = RevocationEvidence::Crl(Crl::parse(CRL_DER).unwrap());
        assert_eq!(a, b);
        assert_eq!(a.serialize(), CRL_DER);
    }

    #[test]
    fn test_malformed_input_is_a_parse_error() {
        assert!(matches!(
            Crl::parse(b"junk"),
            Err(crate::error::Error::Parse { .. })
        ));
        assert!(matches!(
            Ocsp::parse(b"junk"),
            Err(crate::error::Error::Parse { .. })
        ));
    }
}
