//! Document Security Store (DSS) for long-term validation.
//!
//! A document-wide, append-only pool of certificates, CRLs and OCSP
//! responses, plus a per-signature index (VRI) keyed by the uppercase
//! SHA-1 thumbprint of the signature's `/Contents` value. The DSS is what
//! keeps a signature checkable after the original revocation services are
//! gone.
//!
//! Entries are deduplicated by raw-byte equality and never removed,
//! matching the document's incremental-update discipline.

use std::collections::BTreeMap;

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::revocation::{classify, DssObjectKind};

/// Validation-related information for one signature: the DSS subsets that
/// apply to it, plus an optional embedded timestamp stream.
#[derive(Debug, Clone, Default)]
pub struct Vri {
    /// Certificates backing this signature
    pub certs: Vec<Vec<u8>>,
    /// CRLs backing this signature
    pub crls: Vec<Vec<u8>>,
    /// OCSP responses backing this signature
    pub ocsps: Vec<Vec<u8>>,
    /// Raw timestamp token stream, when one was archived
    pub timestamp: Vec<u8>,
}

impl Vri {
    /// Whether this record carries any CRL or OCSP material.
    pub fn has_revocation_material(&self) -> bool {
        !self.crls.is_empty() || !self.ocsps.is_empty()
    }

    /// The archived timestamp stream, when present.
    pub fn timestamp(&self) -> Option<&[u8]> {
        if self.timestamp.is_empty() {
            None
        } else {
            Some(&self.timestamp)
        }
    }

    fn add_unique(pool: &mut Vec<Vec<u8>>, bytes: &[u8]) {
        if !pool.iter().any(|existing| existing == bytes) {
            pool.push(bytes.to_vec());
        }
    }
}

/// The document security store.
#[derive(Debug, Clone, Default)]
pub struct Dss {
    certs: Vec<Vec<u8>>,
    crls: Vec<Vec<u8>>,
    ocsps: Vec<Vec<u8>>,
    vri: BTreeMap<String, Vri>,
    dirty: bool,
}

impl Dss {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uppercase hex SHA-1 thumbprint of a signature's raw `/Contents`
    /// bytes, the canonical VRI key.
    pub fn thumbprint(contents: &[u8]) -> String {
        hex::encode_upper(Sha1::digest(contents))
    }

    /// Whether the store holds nothing at all.
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
            && self.crls.is_empty()
            && self.ocsps.is_empty()
            && self.vri.is_empty()
    }

    /// Whether the store has been mutated since creation. A dirty store is
    /// what gets persisted into the document on the next save.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Certificates in the pool.
    pub fn certs(&self) -> &[Vec<u8>] {
        &self.certs
    }

    /// CRLs in the pool.
    pub fn crls(&self) -> &[Vec<u8>] {
        &self.crls
    }

    /// OCSP responses in the pool.
    pub fn ocsps(&self) -> &[Vec<u8>] {
        &self.ocsps
    }

    /// Add evidence to the store.
    ///
    /// The input is classified by attempting certificate, CRL and OCSP
    /// parses in that order; it fails only if none succeed. The pool is
    /// deduplicated by raw-byte equality before appending. With a
    /// `vri_thumbprint`, a reference is also inserted into that
    /// thumbprint's VRI record (created if absent); thumbprints are
    /// uppercased for canonical lookup.
    pub fn add(&mut self, bytes: &[u8], vri_thumbprint: Option<&str>) -> Result<DssObjectKind> {
        let kind = classify(bytes).ok_or_else(|| {
            Error::parse(
                "DSS object",
                "input is neither a certificate, a CRL nor an OCSP response",
            )
        })?;

        let pool = match kind {
            DssObjectKind::Certificate => &mut self.certs,
            DssObjectKind::Crl => &mut self.crls,
            DssObjectKind::Ocsp => &mut self.ocsps,
        };
        if !pool.iter().any(|existing| existing == bytes) {
            pool.push(bytes.to_vec());
        }

        if let Some(thumbprint) = vri_thumbprint {
            let vri = self.vri.entry(thumbprint.to_uppercase()).or_default();
            match kind {
                DssObjectKind::Certificate => Vri::add_unique(&mut vri.certs, bytes),
                DssObjectKind::Crl => Vri::add_unique(&mut vri.crls, bytes),
                DssObjectKind::Ocsp => Vri::add_unique(&mut vri.ocsps, bytes),
            }
        }

        self.dirty = true;
        log::debug!("DSS add: {:?} ({} bytes)", kind, bytes.len());
        Ok(kind)
    }

    /// Add already-parsed revocation evidence; same dedup and VRI rules
    /// as [`Dss::add`].
    pub fn add_evidence(
        &mut self,
        evidence: &crate::revocation::RevocationEvidence,
        vri_thumbprint: Option<&str>,
    ) -> Result<DssObjectKind> {
        self.add(evidence.serialize(), vri_thumbprint)
    }

    /// Archive a raw timestamp token stream under a signature thumbprint.
    pub fn add_timestamp(&mut self, token: &[u8], thumbprint: &str) {
        let vri = self.vri.entry(thumbprint.to_uppercase()).or_default();
        vri.timestamp = token.to_vec();
        self.dirty = true;
    }

    /// Look up the VRI record for a signature thumbprint.
    pub fn find_vri(&self, thumbprint: &str) -> Option<&Vri> {
        self.vri.get(&thumbprint.to_uppercase())
    }

    /// Thumbprints with VRI records, in canonical order.
    pub fn vri_keys(&self) -> impl Iterator<Item = &String> {
        self.vri.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT_DER: &[u8] = include_bytes!("../tests/fixtures/root.der");
    const LEAF_DER: &[u8] = include_bytes!("../tests/fixtures/leaf.der");
    const CRL_DER: &[u8] = include_bytes!("../tests/fixtures/crl.der");
    const OCSP_GOOD: &[u8] = include_bytes!("../tests/fixtures/ocsp_good.der");

    #[test]
    fn test_thumbprint_is_uppercase_sha1() {
        let tp = Dss::thumbprint(b"abc");
        assert_eq!(tp, "A9993E364706816ABA3E25717850C26C9CD0D89D");
    }

    #[test]
    fn test_add_classifies_in_order() {
        let mut dss = Dss::new();
        assert_eq!(dss.add(ROOT_DER, None).unwrap(), DssObjectKind::Certificate);
        assert_eq!(dss.add(CRL_DER, None).unwrap(), DssObjectKind::Crl);
        assert_eq!(dss.add(OCSP_GOOD, None).unwrap(), DssObjectKind::Ocsp);
        assert_eq!(dss.certs().len(), 1);
        assert_eq!(dss.crls().len(), 1);
        assert_eq!(dss.ocsps().len(), 1);
    }

    #[test]
    fn test_add_rejects_garbage() {
        let mut dss = Dss::new();
        assert!(dss.add(b"not evidence", None).is_err());
        assert!(!dss.is_dirty());
    }

    #[test]
    fn test_dedup_by_raw_bytes() {
        let mut dss = Dss::new();
        dss.add(LEAF_DER, None).unwrap();
        dss.add(LEAF_DER, None).unwrap();
        assert_eq!(dss.certs().len(), 1);
    }

    #[test]
    fn test_vri_attachment_and_dedup() {
        let mut dss = Dss::new();
        let tp = Dss::thumbprint(b"contents bytes");
        dss.add(CRL_DER, Some(&tp)).unwrap();
        dss.add(CRL_DER, Some(&tp)).unwrap();

        let vri = dss.find_vri(&tp).unwrap();
        assert_eq!(vri.crls.len(), 1);
        assert!(vri.has_revocation_material());
        // still exactly one entry in the shared pool
        assert_eq!(dss.crls().len(), 1);
    }

    #[test]
    fn test_vri_lookup_is_case_insensitive() {
        let mut dss = Dss::new();
        let tp = Dss::thumbprint(b"x");
        dss.add(CRL_DER, Some(&tp.to_lowercase())).unwrap();
        assert!(dss.find_vri(&tp).is_some());
        assert!(dss.find_vri(&tp.to_lowercase()).is_some());
    }

    #[test]
    fn test_add_timestamp_stream() {
        let mut dss = Dss::new();
        let tp = Dss::thumbprint(b"sig");
        dss.add_timestamp(b"fake token stream", &tp);
        let vri = dss.find_vri(&tp).unwrap();
        assert_eq!(vri.timestamp(), Some(b"fake token stream".as_ref()));
        assert!(!vri.has_revocation_material());
        assert!(dss.is_dirty());
    }

    #[test]
    fn test_lazily_created_store_starts_clean() {
        let dss = Dss::new();
        assert!(dss.is_empty());
        assert!(!dss.is_dirty());
    }
}
