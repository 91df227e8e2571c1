//! RFC 3161 timestamp token model.
//!
//! A timestamp token is a CMS SignedData whose encapsulated content is a
//! TSTInfo. The token proves a digest existed at `genTime`; whether the
//! token itself can be trusted is decided by independently chain-building
//! its own signer.

use chrono::{DateTime, Utc};

use crate::chain::{BuildOptions, CertificateChainResult, ChainBuilder, CertificateStore};
use crate::container::{CmsContainer, SignerVerdict};
use crate::error::{Error, Result};
use crate::oids;
use crate::revocation::generalized_time_to_chrono;
use crate::types::DigestAlgorithm;

/// Message imprint of a timestamp token: the digest the TSA attested to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageImprint {
    /// Digest algorithm of the imprint
    pub algorithm: Option<DigestAlgorithm>,
    /// The attested digest bytes
    pub digest: Vec<u8>,
}

/// Outcome of verifying a timestamp token.
#[derive(Debug, Clone)]
pub struct TimestampVerifyResult {
    /// Whether the imprint matches the supplied content
    pub imprint_ok: bool,
    /// Cryptographic check of the token's countersignature
    pub signature: SignerVerdict,
    /// Trust chain of the token's own signer
    pub chain: CertificateChainResult,
}

impl TimestampVerifyResult {
    /// Whether the timestamp is trustworthy: imprint, signature and the
    /// signer's chain all check out.
    pub fn trusted(&self) -> bool {
        self.imprint_ok && self.signature == SignerVerdict::Verified && self.chain.is_verified()
    }
}

/// Parsed RFC 3161 timestamp token.
#[derive(Debug, Clone)]
pub struct TimestampToken {
    raw: Vec<u8>,
    container: CmsContainer,
    gen_time: DateTime<Utc>,
    imprint: MessageImprint,
}

impl TimestampToken {
    /// Parse a DER-encoded timestamp token (a CMS ContentInfo).
    pub fn parse(bytes: &[u8]) -> Result<TimestampToken> {
        let container = CmsContainer::parse(bytes)?;
        if container.econtent_type() != oids::ID_CT_TST_INFO {
            return Err(Error::parse(
                "timestamp token",
                format!("unexpected content type {}", container.econtent_type()),
            ));
        }
        let tst_bytes = container
            .econtent_bytes()?
            .ok_or_else(|| Error::parse("timestamp token", "missing TSTInfo content"))?;

        let tst_info = <x509_tsp::TstInfo as der::Decode>::from_der(&tst_bytes)
            .map_err(|e| Error::parse("TSTInfo", e.to_string()))?;

        let gen_time = generalized_time_to_chrono(&tst_info.gen_time);
        let imprint = MessageImprint {
            algorithm: DigestAlgorithm::from_oid(&tst_info.message_imprint.hash_algorithm.oid),
            digest: tst_info.message_imprint.hashed_message.as_bytes().to_vec(),
        };

        Ok(TimestampToken {
            raw: container.serialize().to_vec(),
            container,
            gen_time,
            imprint,
        })
    }

    /// The canonical encoded bytes of the token.
    pub fn serialize(&self) -> &[u8] {
        &self.raw
    }

    /// genTime attested by the TSA.
    pub fn gen_time(&self) -> DateTime<Utc> {
        self.gen_time
    }

    /// The attested message imprint.
    pub fn message_imprint(&self) -> &MessageImprint {
        &self.imprint
    }

    /// The embedded countersignature container.
    pub fn container(&self) -> &CmsContainer {
        &self.container
    }

    /// Verify this token against the content it supposedly timestamps.
    ///
    /// `signed_content` is the digest input the imprint was computed over
    /// (for a signature timestamp: the signature value bytes). The token's
    /// own signer is chain-built against `store` as of the options' check
    /// date, independent of the document signature's chain.
    pub async fn verify(
        &self,
        signed_content: &[u8],
        store: &CertificateStore,
        options: &BuildOptions,
    ) -> TimestampVerifyResult {
        let imprint_ok = match self.imprint.algorithm {
            Some(alg) => alg.digest(signed_content) == self.imprint.digest,
            None => false,
        };

        // The countersignature covers the TSTInfo content.
        let (signature, chain) = match self.verify_countersignature(store, options).await {
            Ok(pair) => pair,
            Err(e) => (
                SignerVerdict::Unknown(e.to_string()),
                CertificateChainResult {
                    code: crate::chain::ChainCode::UntrustedRoot,
                    path: Vec::new(),
                    evidence: Vec::new(),
                    detail: Some(e.to_string()),
                },
            ),
        };

        TimestampVerifyResult {
            imprint_ok,
            signature,
            chain,
        }
    }

    async fn verify_countersignature(
        &self,
        store: &CertificateStore,
        options: &BuildOptions,
    ) -> Result<(SignerVerdict, CertificateChainResult)> {
        let signer = self.container.exactly_one_signer()?;
        let tst_bytes = self
            .container
            .econtent_bytes()?
            .ok_or_else(|| Error::parse("timestamp token", "missing TSTInfo content"))?;

        // Resolve the TSA certificate among the token's own certificates
        // first, then the caller's store.
        let mut candidates = self.container.certificates();
        candidates.extend(store.all_certificates().cloned());
        let signer_cert = signer.resolve_certificate(&candidates);

        let verdict = signer.verify(&tst_bytes, signer_cert.as_deref());

        let chain = match &signer_cert {
            Some(der) => {
                // Token certificates may carry the intermediates the chain
                // needs; make them visible to the builder.
                let mut extended = CertificateStore::new();
                for cert in store.certificates() {
                    extended.add_certificate(cert.clone());
                }
                for root in store.trusted_roots() {
                    extended.add_trusted_root(root.clone());
                }
                for crl in store.crls() {
                    extended.add_crl(crl.clone());
                }
                for ocsp in store.ocsps() {
                    extended.add_ocsp(ocsp.clone());
                }
                for cert in self.container.certificates() {
                    extended.add_certificate(cert);
                }
                for crl in self.container.crls() {
                    extended.add_crl(crl);
                }
                ChainBuilder::new(&extended).build(der, options).await?
            }
            None => CertificateChainResult {
                code: crate::chain::ChainCode::UntrustedRoot,
                path: Vec::new(),
                evidence: Vec::new(),
                detail: Some("timestamp signer certificate not resolved".to_string()),
            },
        };

        Ok((verdict, chain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_plain_cms() {
        // Not even a ContentInfo
        assert!(TimestampToken::parse(b"garbage").is_err());
    }

    #[test]
    fn test_imprint_mismatch_detected() {
        let imprint = MessageImprint {
            algorithm: Some(DigestAlgorithm::Sha256),
            digest: vec![0u8; 32],
        };
        let recomputed = DigestAlgorithm::Sha256.digest(b"some content");
        assert_ne!(imprint.digest, recomputed);
    }
}
