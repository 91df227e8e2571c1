//! Certificate chain building with revocation checking.
//!
//! Walks issuer references from a leaf toward a trust anchor using
//! subject/issuer distinguished-name matching, checking validity windows
//! against the caller's check date (never "now") and consulting revocation
//! evidence per hop. Offline mode only uses evidence already in the store;
//! online mode may fetch fresh CRLs from the certificate's distribution
//! points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::prelude::*;

use crate::container::verify_rsa_signature;
use crate::error::{Error, Result};
use crate::revocation::{serial_eq, Crl, Ocsp, OcspCertStatus, RevocationEvidence};
use crate::types::DigestAlgorithm;

/// Maximum chain length before the walk gives up. Prevents cycles that the
/// explicit cycle check misses (e.g. cross-signed loops).
const MAX_CHAIN_LENGTH: usize = 10;

/// Result code of a chain building attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainCode {
    /// Path reaches a trusted anchor, every hop valid and unrevoked
    Verified,
    /// No path to a trusted anchor could be found
    UntrustedRoot,
    /// A hop was revoked at the check date
    Revoked,
    /// No revocation evidence was available for a hop
    RevocationNotFound,
    /// A hop was outside its validity window at the check date
    BadDate,
    /// A hop's issuer signature did not verify
    SignatureInvalid,
}

/// How revocation evidence may be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationMode {
    /// Only evidence already present in the store may be used
    Offline,
    /// Missing evidence may be fetched over the network
    Online,
}

/// Options for a chain building attempt.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Date at which validity and revocation are evaluated
    pub check_date: DateTime<Utc>,
    /// Evidence policy
    pub revocation_mode: RevocationMode,
}

/// One certificate along the discovered path.
#[derive(Debug, Clone)]
pub struct ChainHop {
    /// Subject DN, rendered
    pub subject: String,
    /// Issuer DN, rendered
    pub issuer: String,
    /// Serial number, hex
    pub serial: String,
    /// DER encoding of the certificate
    pub der: Vec<u8>,
}

/// Result of chain building: the best path found (even on failure, for
/// diagnostics), the result code and the revocation evidence actually used.
#[derive(Debug, Clone)]
pub struct CertificateChainResult {
    /// Outcome
    pub code: ChainCode,
    /// Path from leaf toward the anchor, as far as the walk got
    pub path: Vec<ChainHop>,
    /// Revocation evidence consulted along the way
    pub evidence: Vec<RevocationEvidence>,
    /// Human-readable diagnostics for failures
    pub detail: Option<String>,
}

impl CertificateChainResult {
    /// Whether the chain fully verified.
    pub fn is_verified(&self) -> bool {
        self.code == ChainCode::Verified
    }
}

/// Store of certificates, trusted roots and revocation evidence.
#[derive(Debug, Default)]
pub struct CertificateStore {
    certs: Vec<Vec<u8>>,
    trusted_roots: Vec<Vec<u8>>,
    crls: Vec<Crl>,
    ocsps: Vec<Ocsp>,
}

impl CertificateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an untrusted certificate (leaf or intermediate), deduplicated
    /// by raw bytes.
    pub fn add_certificate(&mut self, cert_der: Vec<u8>) {
        if !self.certs.contains(&cert_der) {
            self.certs.push(cert_der);
        }
    }

    /// Add a trusted root certificate.
    pub fn add_trusted_root(&mut self, cert_der: Vec<u8>) {
        if !self.trusted_roots.contains(&cert_der) {
            self.trusted_roots.push(cert_der);
        }
    }

    /// Add multiple trusted root certificates.
    pub fn add_trusted_roots(&mut self, certs: Vec<Vec<u8>>) {
        for cert in certs {
            self.add_trusted_root(cert);
        }
    }

    /// Add a parsed CRL.
    pub fn add_crl(&mut self, crl: Crl) {
        if !self.crls.contains(&crl) {
            self.crls.push(crl);
        }
    }

    /// Add a parsed OCSP response.
    pub fn add_ocsp(&mut self, ocsp: Ocsp) {
        if !self.ocsps.contains(&ocsp) {
            self.ocsps.push(ocsp);
        }
    }

    /// Add revocation evidence of either kind.
    pub fn add_evidence(&mut self, evidence: RevocationEvidence) {
        match evidence {
            RevocationEvidence::Crl(crl) => self.add_crl(crl),
            RevocationEvidence::Ocsp(ocsp) => self.add_ocsp(ocsp),
        }
    }

    /// Whether a DER-identical certificate is marked as a trusted root.
    pub fn is_trusted_root(&self, cert_der: &[u8]) -> bool {
        self.trusted_roots.iter().any(|root| root == cert_der)
    }

    /// The trusted roots.
    pub fn trusted_roots(&self) -> &[Vec<u8>] {
        &self.trusted_roots
    }

    /// The untrusted certificate pool.
    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.certs
    }

    /// The pooled CRLs.
    pub fn crls(&self) -> &[Crl] {
        &self.crls
    }

    /// The pooled OCSP responses.
    pub fn ocsps(&self) -> &[Ocsp] {
        &self.ocsps
    }

    /// All certificates, pool and trusted roots together.
    pub fn all_certificates(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.trusted_roots.iter().chain(self.certs.iter())
    }

    /// Find a certificate whose subject DN equals `issuer_dn_der`,
    /// trusted roots first.
    fn find_issuer(&self, issuer_dn_der: &[u8]) -> Option<Vec<u8>> {
        self.all_certificates()
            .find(|der| {
                X509Certificate::from_der(der)
                    .map(|(_, cert)| cert.subject().as_raw() == issuer_dn_der)
                    .unwrap_or(false)
            })
            .cloned()
    }
}

/// Online revocation fetcher.
///
/// Currently fetches CRLs from the certificate's distribution points; OCSP
/// querying needs a signed request flow and stays out of scope for the
/// fetcher (responses can still be supplied through the store).
pub struct RevocationFetcher {
    client: reqwest::Client,
}

impl RevocationFetcher {
    /// Create a fetcher with a default HTTP client.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("pdf_signet/0.1")
            .build()
            .map_err(|e| Error::Remote {
                context: "revocation fetcher setup",
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }

    /// Fetch and parse a CRL from `url`.
    pub async fn fetch_crl(&self, url: &str) -> Result<Crl> {
        log::info!("fetching CRL from {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Remote {
                context: "CRL fetch",
                reason: format!("{}: {}", url, e),
            })?;
        if !response.status().is_success() {
            return Err(Error::Remote {
                context: "CRL fetch",
                reason: format!("{}: HTTP {}", url, response.status()),
            });
        }
        let body = response.bytes().await.map_err(|e| Error::Remote {
            context: "CRL fetch",
            reason: e.to_string(),
        })?;
        Crl::parse(&body)
    }
}

/// CRL distribution point URLs declared by a certificate.
fn crl_distribution_urls(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut urls = Vec::new();
    for ext in cert.extensions() {
        if let ParsedExtension::CRLDistributionPoints(points) = ext.parsed_extension() {
            for point in points.points.iter() {
                if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                    for name in names {
                        if let GeneralName::URI(uri) = name {
                            urls.push(uri.to_string());
                        }
                    }
                }
            }
        }
    }
    urls
}

/// Per-hop revocation outcome.
enum HopRevocation {
    Clear(Option<RevocationEvidence>),
    Revoked(DateTime<Utc>, RevocationEvidence),
    NotFound,
}

/// Chain builder over a certificate store.
pub struct ChainBuilder<'a> {
    store: &'a CertificateStore,
    fetcher: Option<&'a RevocationFetcher>,
}

impl<'a> ChainBuilder<'a> {
    /// Create a builder over `store`.
    pub fn new(store: &'a CertificateStore) -> Self {
        Self {
            store,
            fetcher: None,
        }
    }

    /// Attach an online fetcher, used only in `Online` mode.
    pub fn with_fetcher(mut self, fetcher: &'a RevocationFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Build and score a trust path from `leaf_der` under `options`.
    pub async fn build(
        &self,
        leaf_der: &[u8],
        options: &BuildOptions,
    ) -> Result<CertificateChainResult> {
        // Fail early if the leaf itself does not parse; everything after
        // this point is reported through the result code instead.
        let (rem, _) = X509Certificate::from_der(leaf_der)
            .map_err(|e| Error::parse("leaf certificate", e.to_string()))?;
        if !rem.is_empty() {
            return Err(Error::parse("leaf certificate", "trailing bytes"));
        }

        let mut path: Vec<ChainHop> = Vec::new();
        let mut evidence: Vec<RevocationEvidence> = Vec::new();
        let mut revocation_missing = false;
        let mut seen: Vec<Vec<u8>> = Vec::new();

        let mut current: Vec<u8> = leaf_der.to_vec();

        let outcome = loop {
            if path.len() >= MAX_CHAIN_LENGTH {
                break (
                    ChainCode::UntrustedRoot,
                    Some("maximum chain length reached".to_string()),
                );
            }
            if seen.contains(&current) {
                break (
                    ChainCode::UntrustedRoot,
                    Some("circular certificate chain".to_string()),
                );
            }
            seen.push(current.clone());

            let (_, cert) = X509Certificate::from_der(&current)
                .map_err(|e| Error::parse("chain certificate", e.to_string()))?;
            path.push(ChainHop {
                subject: cert.subject().to_string(),
                issuer: cert.issuer().to_string(),
                serial: cert.raw_serial_as_string(),
                der: current.clone(),
            });
            log::debug!("chain hop: {}", cert.subject());

            // Validity window against the check date, not "now", so old
            // signatures can be validated retroactively.
            let check = ASN1Time::from_timestamp(options.check_date.timestamp())
                .map_err(|e| Error::Trust(format!("check date: {}", e)))?;
            if !cert.validity().is_valid_at(check) {
                break (
                    ChainCode::BadDate,
                    Some(format!(
                        "{} not valid at {}",
                        cert.subject(),
                        options.check_date
                    )),
                );
            }

            let is_trusted = self.store.is_trusted_root(&current);

            // Revocation is checked for every hop below the anchor; a
            // root's own revocation is undefined.
            if !is_trusted {
                match self.check_revocation(&cert, options).await {
                    HopRevocation::Revoked(when, used) => {
                        evidence.push(used);
                        break (
                            ChainCode::Revoked,
                            Some(format!("{} revoked at {}", cert.subject(), when)),
                        );
                    }
                    HopRevocation::Clear(used) => {
                        if let Some(used) = used {
                            if !evidence.contains(&used) {
                                evidence.push(used);
                            }
                        }
                    }
                    HopRevocation::NotFound => {
                        log::debug!("no revocation evidence for {}", cert.subject());
                        revocation_missing = true;
                    }
                }
            }

            if is_trusted {
                break if revocation_missing {
                    (ChainCode::RevocationNotFound, None)
                } else {
                    (ChainCode::Verified, None)
                };
            }

            let self_signed = cert.subject().as_raw() == cert.issuer().as_raw();
            if self_signed {
                break (
                    ChainCode::UntrustedRoot,
                    Some(format!("self-signed {} is not a trusted root", cert.subject())),
                );
            }

            let issuer_der = match self.store.find_issuer(cert.issuer().as_raw()) {
                Some(der) => der,
                None => {
                    break (
                        ChainCode::UntrustedRoot,
                        Some(format!("no issuer found for {}", cert.subject())),
                    )
                }
            };

            if let Err(e) = verify_issued_by(&current, &issuer_der) {
                break (ChainCode::SignatureInvalid, Some(e.to_string()));
            }

            current = issuer_der;
        };

        let (code, detail) = outcome;
        log::debug!("chain result: {:?} ({} hops)", code, path.len());
        Ok(CertificateChainResult {
            code,
            path,
            evidence,
            detail,
        })
    }

    /// Consult revocation evidence for one hop.
    async fn check_revocation(
        &self,
        cert: &X509Certificate<'_>,
        options: &BuildOptions,
    ) -> HopRevocation {
        let serial = cert.raw_serial();

        // OCSP responses are the freshest evidence, consult them first.
        for ocsp in &self.store.ocsps {
            match ocsp.status_for_serial(serial) {
                Some(OcspCertStatus::Good) => {
                    return HopRevocation::Clear(Some(RevocationEvidence::Ocsp(ocsp.clone())));
                }
                Some(OcspCertStatus::Revoked { time }) => {
                    if *time <= options.check_date {
                        return HopRevocation::Revoked(
                            *time,
                            RevocationEvidence::Ocsp(ocsp.clone()),
                        );
                    }
                    return HopRevocation::Clear(Some(RevocationEvidence::Ocsp(ocsp.clone())));
                }
                Some(OcspCertStatus::Unknown) | None => {}
            }
        }

        // CRLs are matched to the hop by issuer DN.
        for crl in &self.store.crls {
            if crl.issuer_der() != cert.issuer().as_raw() {
                continue;
            }
            return match crl.revocation_of(serial) {
                Some(when) if when <= options.check_date => {
                    HopRevocation::Revoked(when, RevocationEvidence::Crl(crl.clone()))
                }
                _ => HopRevocation::Clear(Some(RevocationEvidence::Crl(crl.clone()))),
            };
        }

        // Offline mode ends here; online mode may try the certificate's
        // own distribution points.
        if options.revocation_mode == RevocationMode::Online {
            if let Some(fetcher) = self.fetcher {
                for url in crl_distribution_urls(cert) {
                    match fetcher.fetch_crl(&url).await {
                        Ok(crl) => {
                            return match crl.revocation_of(serial) {
                                Some(when) if when <= options.check_date => HopRevocation::Revoked(
                                    when,
                                    RevocationEvidence::Crl(crl),
                                ),
                                _ => HopRevocation::Clear(Some(RevocationEvidence::Crl(crl))),
                            };
                        }
                        Err(e) => {
                            log::warn!("CRL fetch failed: {}", e);
                        }
                    }
                }
            }
        }

        HopRevocation::NotFound
    }
}

/// Verify that `cert_der` was signed by `issuer_der` (RSA over the
/// TBSCertificate bytes).
fn verify_issued_by(cert_der: &[u8], issuer_der: &[u8]) -> Result<()> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| Error::parse("certificate", e.to_string()))?;
    let (_, issuer) = X509Certificate::from_der(issuer_der)
        .map_err(|e| Error::parse("issuer certificate", e.to_string()))?;

    let sig_oid = cert.signature_algorithm.algorithm.to_id_string();
    let digest_alg = match sig_oid.as_str() {
        "1.2.840.113549.1.1.5" => DigestAlgorithm::Sha1,
        "1.2.840.113549.1.1.11" => DigestAlgorithm::Sha256,
        "1.2.840.113549.1.1.12" => DigestAlgorithm::Sha384,
        "1.2.840.113549.1.1.13" => DigestAlgorithm::Sha512,
        other => {
            return Err(Error::Unsupported(format!(
                "certificate signature algorithm {}",
                other
            )))
        }
    };

    let tbs = extract_tbs_certificate(cert_der)?;
    verify_rsa_signature(
        issuer.public_key().raw,
        cert.signature_value.data.as_ref(),
        &tbs,
        digest_alg,
    )
    .map_err(|e| Error::Trust(format!("issuer signature of {}: {}", cert.subject(), e)))
}

/// Extract the TBSCertificate bytes (tag + length + content) from a
/// certificate DER encoding. The outer SEQUENCE wraps TBSCertificate,
/// signatureAlgorithm and signatureValue; the first inner element is what
/// was signed.
fn extract_tbs_certificate(cert_der: &[u8]) -> Result<Vec<u8>> {
    if cert_der.len() < 10 || cert_der[0] != 0x30 {
        return Err(Error::parse("certificate", "not a DER SEQUENCE"));
    }
    let mut pos = 1;
    let (_, outer_len_bytes) = parse_der_length(&cert_der[pos..])?;
    pos += outer_len_bytes;

    if pos >= cert_der.len() || cert_der[pos] != 0x30 {
        return Err(Error::parse_at("TBSCertificate", pos, "not a DER SEQUENCE"));
    }
    let tbs_start = pos;
    let (tbs_content_len, tbs_len_bytes) = parse_der_length(&cert_der[pos + 1..])?;
    let tbs_total_len = 1 + tbs_len_bytes + tbs_content_len;
    if tbs_start + tbs_total_len > cert_der.len() {
        return Err(Error::parse_at("TBSCertificate", pos, "length overruns file"));
    }
    Ok(cert_der[tbs_start..tbs_start + tbs_total_len].to_vec())
}

/// Parse a DER length field; returns (content_length, length_field_bytes).
fn parse_der_length(data: &[u8]) -> Result<(usize, usize)> {
    let first = *data
        .first()
        .ok_or_else(|| Error::parse("DER length", "empty"))?;
    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }
    let length_bytes = (first & 0x7F) as usize;
    if length_bytes == 0 || length_bytes > 4 || data.len() < 1 + length_bytes {
        return Err(Error::parse("DER length", "invalid long form"));
    }
    let mut length = 0usize;
    for &byte in &data[1..=length_bytes] {
        length = (length << 8) | byte as usize;
    }
    Ok((length, 1 + length_bytes))
}
