//! The verification orchestrator.
//!
//! Pure composition of the container, chain, timestamp and DSS modules
//! into a single fault-tolerant report. It never returns an error: every
//! internal failure is caught and converted into a state, so the caller
//! always receives a complete [`SignatureVerifyResult`].

use chrono::{DateTime, Utc};

use crate::byterange::{extract_signed_bytes, validate_byte_range, RangeCheck};
use crate::chain::{
    BuildOptions, CertificateStore, ChainBuilder, ChainCode, RevocationFetcher, RevocationMode,
};
use crate::container::{CmsContainer, SignerVerdict};
use crate::document::{SignatureHandle, SigningDocument};
use crate::dss::Dss;
use crate::timestamp::TimestampToken;
use crate::types::{
    IdentityVerdict, ModificationVerdict, SignatureKind, SignatureState, SignatureSubFilter,
    SignatureVerifyResult, SigningTimeSource, StateDetail,
};

/// Inputs of a verification run.
pub struct VerifyOptions<'a> {
    /// Date at which validity and revocation are evaluated; defaults to
    /// the current time
    pub check_date: Option<DateTime<Utc>>,
    /// Trust anchors and supplementary certificates/evidence
    pub store: &'a CertificateStore,
    /// Online fetcher for the escalation path; without one, escalation
    /// degrades to the offline verdict
    pub fetcher: Option<&'a RevocationFetcher>,
}

impl SigningDocument {
    /// Verify every signature in the document. Never fails: a document
    /// with no resolvable signature yields a single corrupted-document
    /// report.
    pub async fn verify(&self, options: &VerifyOptions<'_>) -> Vec<SignatureVerifyResult> {
        let handles = self.signatures();
        if handles.is_empty() {
            let mut result = SignatureVerifyResult::default();
            result.push(SignatureState::invalid(StateDetail::DocumentCorrupted {
                reason: "no signature field could be resolved".to_string(),
            }));
            result.verification_result = false;
            return vec![result];
        }
        let mut results = Vec::with_capacity(handles.len());
        for handle in &handles {
            results.push(verify_signature(self.bytes(), handle, self.dss(), options).await);
        }
        results
    }
}

/// Verify one located signature against the serialized document bytes.
///
/// The fixed sequence of checks runs to the end whatever fails; gates
/// that make later checks meaningless (an unparseable container, more
/// than one signer) abort only the crypto-specific steps.
pub async fn verify_signature(
    bytes: &[u8],
    handle: &SignatureHandle,
    dss: Option<&Dss>,
    options: &VerifyOptions<'_>,
) -> SignatureVerifyResult {
    let mut result = SignatureVerifyResult {
        field_name: handle.info.field_name.clone(),
        ..SignatureVerifyResult::default()
    };
    let check_date = options.check_date.unwrap_or_else(Utc::now);
    let thumbprint = Dss::thumbprint(&handle.contents_raw);

    // --- container parse and the single-signer gate ------------------
    let container = match CmsContainer::parse(&handle.contents_raw) {
        Ok(container) => Some(container),
        Err(e) => {
            result.push(SignatureState::invalid(StateDetail::ContainerParse {
                reason: e.to_string(),
            }));
            None
        }
    };

    let signer = match &container {
        Some(container) => match container.exactly_one_signer() {
            Ok(signer) => Some(signer),
            Err(_) => {
                result.push(SignatureState::invalid(StateDetail::SignerCount {
                    count: container.signers().len(),
                }));
                None
            }
        },
        None => None,
    };

    // --- timestamp location ------------------------------------------
    let vri = dss.and_then(|d| d.find_vri(&thumbprint));
    let timestamp = signer
        .and_then(|s| s.timestamp_token())
        .or_else(|| vri.and_then(|v| v.timestamp().map(|t| t.to_vec())))
        .or_else(|| {
            // a document timestamp field carries the token as its value
            (handle.info.sub_filter == Some(SignatureSubFilter::Rfc3161))
                .then(|| handle.contents_raw.clone())
        })
        .and_then(|der| match TimestampToken::parse(&der) {
            Ok(token) => Some(token),
            Err(e) => {
                result.push(SignatureState::warn(StateDetail::TimestampTrust {
                    gen_time: None,
                    chain_code: None,
                    reason: Some(format!("embedded timestamp did not parse: {}", e)),
                }));
                None
            }
        });

    // --- signing time derivation -------------------------------------
    if let Some(token) = &timestamp {
        result.signing_time = Some(token.gen_time());
        result.push(SignatureState::valid(StateDetail::SigningTime {
            time: token.gen_time(),
            source: SigningTimeSource::Timestamp,
        }));
    } else if let Some(time) = signer.and_then(|s| s.signing_time_attr()) {
        // Self-asserted, explicitly lower trust than a timestamp.
        result.signing_time = Some(time);
        result.push(SignatureState::info(StateDetail::SigningTime {
            time,
            source: SigningTimeSource::SignedAttribute,
        }));
    }

    // --- signature type classification -------------------------------
    let kind = match handle.info.sub_filter {
        Some(SignatureSubFilter::Rfc3161) => SignatureKind::Timestamp,
        _ if handle.info.certification.is_some() => SignatureKind::Certified,
        _ => SignatureKind::Signature,
    };
    result.signature_kind = kind;
    result.push(SignatureState::info(StateDetail::SignatureType { kind }));

    // --- formatting check --------------------------------------------
    let range_usable = check_formatting(bytes, handle, &mut result);

    // --- reconstruct the covered content ------------------------------
    let content = if range_usable {
        match extract_signed_bytes(bytes, &handle.byte_range) {
            Ok(content) => Some(content),
            Err(e) => {
                result.push(SignatureState::invalid(StateDetail::Formatting {
                    problem: e.to_string(),
                }));
                None
            }
        }
    } else {
        None
    };

    // --- evidence pool visible to chain building ----------------------
    let effective_store = build_effective_store(options.store, container.as_ref(), dss);

    // --- modification check, split by signature kind -------------------
    let (modification, signer_cert) = if kind == SignatureKind::Timestamp {
        verify_document_timestamp(&container, content.as_deref(), &mut result)
    } else {
        verify_document_signature(signer, &effective_store, content.as_deref(), &mut result)
    };

    if modification == ModificationVerdict::NotModified {
        // failing verdicts were pushed with their reasons already
        result.push(SignatureState::valid(StateDetail::DocumentModification {
            verdict: modification,
            reason: None,
        }));
    }

    // --- LTV check ----------------------------------------------------
    let is_ltv = vri.map(|v| v.has_revocation_material()).unwrap_or(false)
        || container.as_ref().map(|c| c.has_crls()).unwrap_or(false)
        || signer
            .and_then(|s| s.revocation_archival())
            .map(|a| a.has_revocation_material())
            .unwrap_or(false);
    result.is_ltv = is_ltv;
    result.push(SignatureState::info(StateDetail::Ltv { enabled: is_ltv }));

    // --- identity check -----------------------------------------------
    let identity = match &signer_cert {
        Some(cert_der) => {
            record_signer_certificate(cert_der, &mut result);
            let chain = build_chain_with_escalation(
                &effective_store,
                options.fetcher,
                cert_der,
                check_date,
                is_ltv,
            )
            .await;
            match chain {
                Ok(chain) => {
                    let verdict = if chain.is_verified() {
                        IdentityVerdict::Verified
                    } else {
                        IdentityVerdict::NotVerified
                    };
                    let state = StateDetail::Identity {
                        verdict,
                        chain_code: Some(chain.code),
                        subject: chain.path.first().map(|hop| hop.subject.clone()),
                        reason: chain.detail.clone(),
                    };
                    result.push(match verdict {
                        IdentityVerdict::Verified => SignatureState::valid(state),
                        _ => SignatureState::invalid(state),
                    });
                    verdict
                }
                Err(e) => {
                    result.push(SignatureState::invalid(StateDetail::Identity {
                        verdict: IdentityVerdict::NotVerified,
                        chain_code: None,
                        subject: None,
                        reason: Some(e.to_string()),
                    }));
                    IdentityVerdict::NotVerified
                }
            }
        }
        None => {
            result.push(SignatureState::warn(StateDetail::Identity {
                verdict: IdentityVerdict::Unknown,
                chain_code: None,
                subject: None,
                reason: Some("signer certificate could not be resolved".to_string()),
            }));
            IdentityVerdict::Unknown
        }
    };

    result.verification_result =
        modification == ModificationVerdict::NotModified && identity == IdentityVerdict::Verified;

    // --- trust of the embedded timestamp itself ------------------------
    // (for a document timestamp field the token IS the signature; its
    // trust was just decided by the modification and identity checks)
    if kind == SignatureKind::Timestamp {
        return result;
    }
    if let (Some(token), Some(signer)) = (&timestamp, signer) {
        let ts_options = BuildOptions {
            check_date,
            revocation_mode: RevocationMode::Offline,
        };
        let outcome = token
            .verify(signer.signature(), &effective_store, &ts_options)
            .await;
        let state = StateDetail::TimestampTrust {
            gen_time: Some(token.gen_time()),
            chain_code: Some(outcome.chain.code),
            reason: (!outcome.trusted()).then(|| {
                if !outcome.imprint_ok {
                    "timestamp imprint does not match the signature".to_string()
                } else if outcome.signature != SignerVerdict::Verified {
                    "timestamp countersignature did not verify".to_string()
                } else {
                    "timestamp signer chain did not verify".to_string()
                }
            }),
        };
        // A valid document signature with an untrustworthy timestamp is
        // reported separately, never silently treated as trustworthy.
        result.push(if outcome.trusted() {
            SignatureState::valid(state)
        } else {
            SignatureState::invalid(state)
        });
    }

    result
}

/// Formatting check: ByteRange arithmetic against the actual bytes, plus
/// the placement of the `/Contents` value inside the gap. Returns whether
/// the range is usable for content reconstruction.
fn check_formatting(
    bytes: &[u8],
    handle: &SignatureHandle,
    result: &mut SignatureVerifyResult,
) -> bool {
    match validate_byte_range(&handle.byte_range, bytes) {
        Ok(RangeCheck::Exact) => {}
        Ok(RangeCheck::TrailingWhitespace(len)) => {
            // Legacy serializers pad after the covered range; tolerated.
            log::debug!("{} trailing whitespace bytes after covered range", len);
        }
        Ok(RangeCheck::TrailingGarbage(len)) => {
            result.push(SignatureState::warn(StateDetail::Formatting {
                problem: format!(
                    "{} non-whitespace bytes after the covered range",
                    len
                ),
            }));
        }
        Err(e) => {
            result.push(SignatureState::invalid(StateDetail::Formatting {
                problem: e.to_string(),
            }));
            return false;
        }
    }

    // The gap between the two spans must be exactly the /Contents value.
    let gap_start = handle.byte_range.before_len() as usize;
    let gap_len = handle.byte_range.gap_len() as usize;
    if gap_start != handle.contents_offset || gap_len != handle.contents_width {
        result.push(SignatureState::invalid(StateDetail::Formatting {
            problem: format!(
                "ByteRange gap [{}..{}] does not delimit the /Contents value at {} (width {})",
                gap_start,
                gap_start + gap_len,
                handle.contents_offset,
                handle.contents_width
            ),
        }));
        return false;
    }
    true
}

/// Modification + signer resolution for an ordinary or certification
/// signature.
fn verify_document_signature(
    signer: Option<&crate::container::CmsSignerInfo>,
    effective_store: &CertificateStore,
    content: Option<&[u8]>,
    result: &mut SignatureVerifyResult,
) -> (ModificationVerdict, Option<Vec<u8>>) {
    let Some(signer) = signer else {
        result.push(SignatureState::invalid(StateDetail::DocumentModification {
            verdict: ModificationVerdict::Error,
            reason: Some("no usable signer".to_string()),
        }));
        return (ModificationVerdict::Error, None);
    };
    let Some(content) = content else {
        result.push(SignatureState::invalid(StateDetail::DocumentModification {
            verdict: ModificationVerdict::Error,
            reason: Some("covered content could not be reconstructed".to_string()),
        }));
        return (ModificationVerdict::Error, None);
    };

    let candidates: Vec<Vec<u8>> = effective_store.all_certificates().cloned().collect();
    let signer_cert = signer.resolve_certificate(&candidates);

    match signer.verify(content, signer_cert.as_deref()) {
        SignerVerdict::Verified => (ModificationVerdict::NotModified, signer_cert),
        SignerVerdict::Failed(reason) => {
            result.push(SignatureState::invalid(StateDetail::DocumentModification {
                verdict: ModificationVerdict::Modified,
                reason: Some(reason),
            }));
            (ModificationVerdict::Modified, signer_cert)
        }
        SignerVerdict::Unknown(reason) => {
            // Unknown is not Modified: nothing could be checked at all.
            result.push(SignatureState::warn(StateDetail::DocumentModification {
                verdict: ModificationVerdict::Error,
                reason: Some(reason),
            }));
            (ModificationVerdict::Error, signer_cert)
        }
    }
}

/// Modification + signer resolution for a document timestamp field: the
/// token's message imprint covers the ByteRange content directly.
fn verify_document_timestamp(
    container: &Option<CmsContainer>,
    content: Option<&[u8]>,
    result: &mut SignatureVerifyResult,
) -> (ModificationVerdict, Option<Vec<u8>>) {
    let (Some(container), Some(content)) = (container, content) else {
        result.push(SignatureState::invalid(StateDetail::DocumentModification {
            verdict: ModificationVerdict::Error,
            reason: Some("timestamp container unusable".to_string()),
        }));
        return (ModificationVerdict::Error, None);
    };

    let token = match TimestampToken::parse(container.serialize()) {
        Ok(token) => token,
        Err(e) => {
            result.push(SignatureState::invalid(StateDetail::DocumentModification {
                verdict: ModificationVerdict::Error,
                reason: Some(format!("not a timestamp token: {}", e)),
            }));
            return (ModificationVerdict::Error, None);
        }
    };

    let imprint = token.message_imprint();
    let matches = imprint
        .algorithm
        .map(|alg| alg.digest(content) == imprint.digest)
        .unwrap_or(false);

    let signer_cert = token
        .container()
        .exactly_one_signer()
        .ok()
        .and_then(|signer| signer.resolve_certificate(&token.container().certificates()));

    if matches {
        (ModificationVerdict::NotModified, signer_cert)
    } else {
        result.push(SignatureState::invalid(StateDetail::DocumentModification {
            verdict: ModificationVerdict::Modified,
            reason: Some("timestamp imprint does not match the covered content".to_string()),
        }));
        (ModificationVerdict::Modified, signer_cert)
    }
}

/// Pool the caller's store with everything the signature brought along:
/// container certificates and CRLs, and the document's DSS.
fn build_effective_store(
    store: &CertificateStore,
    container: Option<&CmsContainer>,
    dss: Option<&Dss>,
) -> CertificateStore {
    let mut effective = CertificateStore::new();
    for root in store.trusted_roots() {
        effective.add_trusted_root(root.clone());
    }
    for cert in store.certificates() {
        effective.add_certificate(cert.clone());
    }
    for crl in store.crls() {
        effective.add_crl(crl.clone());
    }
    for ocsp in store.ocsps() {
        effective.add_ocsp(ocsp.clone());
    }

    if let Some(container) = container {
        for cert in container.certificates() {
            effective.add_certificate(cert);
        }
        for crl in container.crls() {
            effective.add_crl(crl);
        }
    }

    if let Some(dss) = dss {
        for cert in dss.certs() {
            effective.add_certificate(cert.clone());
        }
        for crl in dss.crls() {
            if let Ok(crl) = crate::revocation::Crl::parse(crl) {
                effective.add_crl(crl);
            }
        }
        for ocsp in dss.ocsps() {
            if let Ok(ocsp) = crate::revocation::Ocsp::parse(ocsp) {
                effective.add_ocsp(ocsp);
            }
        }
    }
    effective
}

/// Record the resolved signer certificate on the result scalars.
fn record_signer_certificate(cert_der: &[u8], result: &mut SignatureVerifyResult) {
    use x509_parser::prelude::{FromDer, X509Certificate};
    result.signer_certificate = Some(cert_der.to_vec());
    if let Ok((_, cert)) = X509Certificate::from_der(cert_der) {
        result.signer_subject = Some(cert.subject().to_string());
    }
}

/// Chain building with the escalation policy: offline first when LTV
/// material exists, escalating to online when offline concludes
/// `RevocationNotFound`; online directly otherwise.
async fn build_chain_with_escalation(
    store: &CertificateStore,
    fetcher: Option<&RevocationFetcher>,
    leaf_der: &[u8],
    check_date: DateTime<Utc>,
    is_ltv: bool,
) -> crate::error::Result<crate::chain::CertificateChainResult> {
    let offline = BuildOptions {
        check_date,
        revocation_mode: RevocationMode::Offline,
    };
    let online = BuildOptions {
        check_date,
        revocation_mode: RevocationMode::Online,
    };

    let mut builder = ChainBuilder::new(store);
    if let Some(fetcher) = fetcher {
        builder = builder.with_fetcher(fetcher);
    }

    if is_ltv {
        let result = builder.build(leaf_der, &offline).await?;
        if result.code != ChainCode::RevocationNotFound {
            return Ok(result);
        }
        log::debug!("offline revocation inconclusive, escalating to online");
        builder.build(leaf_der, &online).await
    } else {
        builder.build(leaf_der, &online).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::minimal_test_pdf;

    fn empty_store() -> CertificateStore {
        CertificateStore::new()
    }

    #[tokio::test]
    async fn test_unsigned_document_reports_corruption() {
        let doc = SigningDocument::new(minimal_test_pdf()).unwrap();
        let store = empty_store();
        let options = VerifyOptions {
            check_date: None,
            store: &store,
            fetcher: None,
        };
        let results = doc.verify(&options).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].verification_result);
        assert_eq!(
            results[0].states[0].detail.code(),
            "document_corrupted"
        );
    }

    #[tokio::test]
    async fn test_garbage_container_still_yields_full_report() {
        let mut doc = SigningDocument::new(minimal_test_pdf()).unwrap();
        doc.sign(
            crate::types::SignOptions::default().with_container_size(64),
            |_b| async { Ok(vec![0x42; 64]) }, // not a CMS message
        )
        .await
        .unwrap();

        let store = empty_store();
        let options = VerifyOptions {
            check_date: None,
            store: &store,
            fetcher: None,
        };
        let results = doc.verify(&options).await;
        assert_eq!(results.len(), 1);
        let report = &results[0];
        assert!(!report.verification_result);
        assert!(report.state("container_parse").is_some());
        // the report still classified the signature and ran the
        // formatting check
        assert!(report.state("signature_type").is_some());
        assert!(report.state("ltv").is_some());
    }
}
