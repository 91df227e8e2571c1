//! CMS SignedData container model.
//!
//! Parses the detached PKCS#7/CMS message stored in a signature's
//! `/Contents` value and exposes the pieces verification needs: the single
//! signer-info, embedded certificates and CRLs, signed and unsigned
//! attributes, and the cryptographic check itself.

use chrono::{DateTime, TimeZone, Utc};
use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::revocation::RevocationInfoChoice;
use cms::signed_data::{SignedData, SignerIdentifier, SignerInfo as RawSignerInfo};
use der::asn1::{GeneralizedTime, OctetString, UtcTime};
use der::{Any, Decode, Encode, Reader, Sequence, SliceReader};
use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use signature::Verifier;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{Error, Result};
use crate::oids;
use crate::revocation::{generalized_time_to_chrono, serial_eq, Crl};
use crate::types::DigestAlgorithm;

/// Outcome of the cryptographic signer check.
///
/// `Unknown` means the signer certificate could not be resolved; it must
/// never be conflated with `Failed`, which means the mathematics failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerVerdict {
    /// Digest and signature check out against the signer's public key
    Verified,
    /// The signature (or the signed digest attribute) does not match
    Failed(String),
    /// No signer certificate could be resolved, nothing could be checked
    Unknown(String),
}

/// Adobe revocation-info-archival attribute payload
/// (1.2.840.113583.1.1.8). Only presence of CRL/OCSP material matters for
/// the LTV check, so the entries stay opaque.
#[derive(Clone, Debug, Sequence)]
pub struct RevocationInfoArchival {
    /// Archived CRLs
    #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
    pub crls: Option<Any>,
    /// Archived OCSP responses
    #[asn1(context_specific = "1", optional = "true", tag_mode = "EXPLICIT")]
    pub ocsps: Option<Any>,
    /// Other revocation formats
    #[asn1(context_specific = "2", optional = "true", tag_mode = "EXPLICIT")]
    pub other: Option<Any>,
}

impl RevocationInfoArchival {
    /// Whether the attribute archives any CRL or OCSP bytes.
    pub fn has_revocation_material(&self) -> bool {
        self.crls.is_some() || self.ocsps.is_some()
    }
}

/// One signer of a CMS container.
#[derive(Debug, Clone)]
pub struct CmsSignerInfo {
    inner: RawSignerInfo,
}

impl CmsSignerInfo {
    /// Issuer DN (rendered) and raw serial of the signing certificate this
    /// signer references. The container references the certificate, it
    /// never owns it.
    pub fn issuer_and_serial(&self) -> Option<(String, Vec<u8>)> {
        match &self.inner.sid {
            SignerIdentifier::IssuerAndSerialNumber(ias) => Some((
                ias.issuer.to_string(),
                ias.serial_number.as_bytes().to_vec(),
            )),
            SignerIdentifier::SubjectKeyIdentifier(_) => None,
        }
    }

    /// Digest algorithm declared by this signer.
    pub fn digest_algorithm(&self) -> Option<DigestAlgorithm> {
        DigestAlgorithm::from_oid(&self.inner.digest_alg.oid)
    }

    /// Raw signature value bytes.
    pub fn signature(&self) -> &[u8] {
        self.inner.signature.as_bytes()
    }

    /// First value of a signed attribute, by OID.
    fn signed_attr_value(&self, oid: der::asn1::ObjectIdentifier) -> Option<&Any> {
        self.inner
            .signed_attrs
            .as_ref()?
            .iter()
            .find(|attr| attr.oid == oid)
            .and_then(|attr| attr.values.iter().next())
    }

    /// First value of an unsigned attribute, by OID.
    fn unsigned_attr_value(&self, oid: der::asn1::ObjectIdentifier) -> Option<&Any> {
        self.inner
            .unsigned_attrs
            .as_ref()?
            .iter()
            .find(|attr| attr.oid == oid)
            .and_then(|attr| attr.values.iter().next())
    }

    /// The signed message-digest attribute, when present.
    pub fn message_digest_attr(&self) -> Option<Vec<u8>> {
        let any = self.signed_attr_value(oids::ID_MESSAGE_DIGEST)?;
        any.decode_as::<OctetString>()
            .ok()
            .map(|os| os.as_bytes().to_vec())
    }

    /// The self-asserted signing-time signed attribute, when present.
    pub fn signing_time_attr(&self) -> Option<DateTime<Utc>> {
        let any = self.signed_attr_value(oids::ID_SIGNING_TIME)?;
        if let Ok(utc) = any.decode_as::<UtcTime>() {
            let d = utc.to_unix_duration();
            return Utc.timestamp_opt(d.as_secs() as i64, d.subsec_nanos()).single();
        }
        if let Ok(gen) = any.decode_as::<GeneralizedTime>() {
            return Some(generalized_time_to_chrono(&gen));
        }
        None
    }

    /// Raw DER of an embedded RFC 3161 timestamp token (unsigned
    /// attribute), when present.
    pub fn timestamp_token(&self) -> Option<Vec<u8>> {
        let any = self.unsigned_attr_value(oids::ID_AA_TIME_STAMP_TOKEN)?;
        any.to_der().ok()
    }

    /// The Adobe revocation-info-archival signed attribute, when present.
    pub fn revocation_archival(&self) -> Option<RevocationInfoArchival> {
        let any = self.signed_attr_value(oids::ADBE_REVOCATION_INFO_ARCHIVAL)?;
        any.decode_as::<RevocationInfoArchival>().ok()
    }

    /// Resolve the signer certificate among `candidates` (DER encodings)
    /// by issuer DN and serial number.
    pub fn resolve_certificate(&self, candidates: &[Vec<u8>]) -> Option<Vec<u8>> {
        let ias = match &self.inner.sid {
            SignerIdentifier::IssuerAndSerialNumber(ias) => ias,
            SignerIdentifier::SubjectKeyIdentifier(_) => return None,
        };
        let issuer_der = ias.issuer.to_der().ok()?;
        let serial = ias.serial_number.as_bytes();

        candidates.iter().find_map(|der| {
            let (rem, cert) = X509Certificate::from_der(der).ok()?;
            if !rem.is_empty() {
                return None;
            }
            if cert.issuer().as_raw() == issuer_der.as_slice()
                && serial_eq(cert.raw_serial(), serial)
            {
                Some(der.clone())
            } else {
                None
            }
        })
    }

    /// Run the cryptographic check of this signer over `content` (the
    /// reconstructed ByteRange spans).
    ///
    /// With signed attributes present, the message-digest attribute is
    /// compared against a fresh digest of `content` and the signature is
    /// verified over the SET-OF-retagged attributes DER; otherwise the
    /// signature covers `content` directly.
    pub fn verify(&self, content: &[u8], signer_cert_der: Option<&[u8]>) -> SignerVerdict {
        let cert_der = match signer_cert_der {
            Some(der) => der,
            None => {
                return SignerVerdict::Unknown(
                    "signer certificate could not be resolved".to_string(),
                )
            }
        };

        let digest_alg = match self.digest_algorithm() {
            Some(alg) => alg,
            None => {
                return SignerVerdict::Failed(format!(
                    "unsupported digest algorithm {}",
                    self.inner.digest_alg.oid
                ))
            }
        };

        let sig_oid = self.inner.signature_algorithm.oid;
        if sig_oid != oids::RSA_ENCRYPTION
            && sig_oid != oids::SHA256_WITH_RSA
            && sig_oid != oids::SHA384_WITH_RSA
            && sig_oid != oids::SHA512_WITH_RSA
        {
            return SignerVerdict::Failed(format!(
                "unsupported signature algorithm {}",
                sig_oid
            ));
        }

        // The message the signature actually covers
        let message = match &self.inner.signed_attrs {
            Some(attrs) => {
                let expected = digest_alg.digest(content);
                match self.message_digest_attr() {
                    Some(found) if found == expected => {}
                    Some(_) => {
                        return SignerVerdict::Failed(
                            "message-digest attribute does not match content".to_string(),
                        )
                    }
                    None => {
                        return SignerVerdict::Failed(
                            "signed attributes lack a message-digest attribute".to_string(),
                        )
                    }
                }
                let mut der = match attrs.to_der() {
                    Ok(der) => der,
                    Err(e) => return SignerVerdict::Failed(format!("attribute encoding: {}", e)),
                };
                // Signature covers the attributes under their SET OF tag,
                // not the IMPLICIT [0] tag they carry inside SignerInfo.
                if der.first() == Some(&0xA0) {
                    der[0] = 0x31;
                }
                der
            }
            None => content.to_vec(),
        };

        let (rem, cert) = match X509Certificate::from_der(cert_der) {
            Ok(parsed) => parsed,
            Err(e) => return SignerVerdict::Failed(format!("signer certificate: {}", e)),
        };
        if !rem.is_empty() {
            return SignerVerdict::Failed("trailing bytes after signer certificate".to_string());
        }

        match verify_rsa_signature(cert.public_key().raw, self.signature(), &message, digest_alg) {
            Ok(()) => SignerVerdict::Verified,
            Err(e) => SignerVerdict::Failed(e.to_string()),
        }
    }
}

/// Verify an RSA PKCS#1 v1.5 signature over `message`, dispatching on the
/// digest algorithm.
pub(crate) fn verify_rsa_signature(
    spki_der: &[u8],
    signature: &[u8],
    message: &[u8],
    digest_alg: DigestAlgorithm,
) -> Result<()> {
    let public_key = RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| Error::Trust(format!("RSA public key: {}", e)))?;
    let signature = RsaSignature::try_from(signature)
        .map_err(|e| Error::Trust(format!("signature value: {}", e)))?;

    let outcome = match digest_alg {
        DigestAlgorithm::Sha1 => {
            VerifyingKey::<Sha1>::new(public_key).verify(message, &signature)
        }
        DigestAlgorithm::Sha256 => {
            VerifyingKey::<Sha256>::new(public_key).verify(message, &signature)
        }
        DigestAlgorithm::Sha384 => {
            VerifyingKey::<Sha384>::new(public_key).verify(message, &signature)
        }
        DigestAlgorithm::Sha512 => {
            VerifyingKey::<Sha512>::new(public_key).verify(message, &signature)
        }
    };
    outcome.map_err(|e| Error::Trust(format!("signature verification failed: {}", e)))
}

/// Parsed CMS SignedData container.
#[derive(Debug, Clone)]
pub struct CmsContainer {
    raw: Vec<u8>,
    signed_data: SignedData,
    signers: Vec<CmsSignerInfo>,
}

impl CmsContainer {
    /// Parse a CMS container from the decoded `/Contents` bytes.
    ///
    /// The value is read from a zero-padded reservation, so trailing bytes
    /// after the DER structure are tolerated (and excluded from `raw`).
    pub fn parse(bytes: &[u8]) -> Result<CmsContainer> {
        let mut reader = SliceReader::new(bytes)
            .map_err(|e| Error::parse("CMS container", e.to_string()))?;
        let content_info = ContentInfo::decode(&mut reader)
            .map_err(|e| Error::parse("CMS container", e.to_string()))?;
        let consumed = u32::from(reader.position()) as usize;

        if content_info.content_type != oids::ID_SIGNED_DATA {
            return Err(Error::parse(
                "CMS container",
                format!("not a SignedData message: {}", content_info.content_type),
            ));
        }

        let content_der = content_info
            .content
            .to_der()
            .map_err(|e| Error::parse("CMS container", e.to_string()))?;
        let signed_data = SignedData::from_der(&content_der)
            .map_err(|e| Error::parse("CMS SignedData", e.to_string()))?;

        let signers = signed_data
            .signer_infos
            .0
            .iter()
            .cloned()
            .map(|inner| CmsSignerInfo { inner })
            .collect();

        Ok(CmsContainer {
            raw: bytes[..consumed].to_vec(),
            signed_data,
            signers,
        })
    }

    /// The canonical encoded bytes (padding stripped).
    pub fn serialize(&self) -> &[u8] {
        &self.raw
    }

    /// All signers of the container.
    pub fn signers(&self) -> &[CmsSignerInfo] {
        &self.signers
    }

    /// The single signer a signature field must carry. Zero or more than
    /// one signer is an error, never silently tolerated.
    pub fn exactly_one_signer(&self) -> Result<&CmsSignerInfo> {
        match self.signers.len() {
            1 => Ok(&self.signers[0]),
            n => Err(Error::parse(
                "CMS container",
                format!("expected exactly one signer, found {}", n),
            )),
        }
    }

    /// Whether this is a detached message (no encapsulated content).
    pub fn is_detached(&self) -> bool {
        self.signed_data.encap_content_info.econtent.is_none()
    }

    /// Content type of the encapsulated content.
    pub fn econtent_type(&self) -> der::asn1::ObjectIdentifier {
        self.signed_data.encap_content_info.econtent_type
    }

    /// Raw encapsulated content bytes, when present (e.g. the TSTInfo of a
    /// timestamp token).
    pub fn econtent_bytes(&self) -> Result<Option<Vec<u8>>> {
        match &self.signed_data.encap_content_info.econtent {
            None => Ok(None),
            Some(any) => {
                let os = OctetString::from_der(&any.to_der()?)
                    .map_err(|e| Error::parse("eContent", e.to_string()))?;
                Ok(Some(os.as_bytes().to_vec()))
            }
        }
    }

    /// DER encodings of all embedded certificates.
    pub fn certificates(&self) -> Vec<Vec<u8>> {
        let Some(certs) = &self.signed_data.certificates else {
            return Vec::new();
        };
        certs
            .0
            .iter()
            .filter_map(|choice| match choice {
                CertificateChoices::Certificate(_) => choice.to_der().ok(),
                CertificateChoices::Other(_) => None,
            })
            .collect()
    }

    /// Embedded CRLs, parsed.
    pub fn crls(&self) -> Vec<Crl> {
        let Some(crls) = &self.signed_data.crls else {
            return Vec::new();
        };
        crls.0
            .iter()
            .filter_map(|choice| match choice {
                RevocationInfoChoice::Crl(list) => {
                    list.to_der().ok().and_then(|der| Crl::parse(&der).ok())
                }
                RevocationInfoChoice::Other(_) => None,
            })
            .collect()
    }

    /// Whether the container carries any CRL at all (LTV signal).
    pub fn has_crls(&self) -> bool {
        self.signed_data
            .crls
            .as_ref()
            .map(|c| c.0.len() > 0)
            .unwrap_or(false)
    }
}
