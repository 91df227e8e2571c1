//! DSS / VRI behavior at the document level: deduplication, VRI
//! timestamp lookup during verification, and persistence into the
//! incremental update.

mod common;

use common::{
    build_cms, build_timestamp_token, check_date, store_with_root_and_crl, CmsBuild, CRL_DER,
    LEAF_DER, OCSP_GOOD,
};
use pdf_signet::document::minimal_test_pdf;
use pdf_signet::{
    Dss, SignOptions, Severity, SigningDocument, SigningTimeSource, StateDetail, VerifyOptions,
};

#[test]
fn dss_add_twice_keeps_one_entry() {
    let mut dss = Dss::new();
    dss.add(LEAF_DER, None).unwrap();
    dss.add(LEAF_DER, None).unwrap();
    assert_eq!(dss.certs().len(), 1);
}

#[test]
fn vri_shares_the_pool_entry() {
    let mut dss = Dss::new();
    let thumbprint = Dss::thumbprint(b"signature contents");
    dss.add(OCSP_GOOD, Some(&thumbprint)).unwrap();
    dss.add(OCSP_GOOD, Some(&thumbprint)).unwrap();

    assert_eq!(dss.ocsps().len(), 1);
    let vri = dss.find_vri(&thumbprint).unwrap();
    assert_eq!(vri.ocsps.len(), 1);
    assert_eq!(vri.ocsps[0].as_slice(), OCSP_GOOD);
}

#[tokio::test]
async fn vri_revocation_material_makes_a_signature_ltv() {
    let mut doc = SigningDocument::new(minimal_test_pdf()).unwrap();
    doc.sign(
        SignOptions::default().with_container_size(4096),
        |bytes| async move { Ok(build_cms(&bytes, &CmsBuild::default())) },
    )
    .await
    .unwrap();

    // Archive revocation evidence for exactly this signature
    let thumbprint = Dss::thumbprint(&doc.signatures()[0].contents_raw);
    doc.dss_mut().add(CRL_DER, Some(&thumbprint)).unwrap();

    let store = store_with_root_and_crl();
    let options = VerifyOptions {
        check_date: Some(check_date()),
        store: &store,
        fetcher: None,
    };
    let report = &doc.verify(&options).await[0];
    assert!(report.is_ltv);
    assert!(report.verification_result);
}

#[tokio::test]
async fn vri_timestamp_supplies_trusted_time() {
    let mut doc = SigningDocument::new(minimal_test_pdf()).unwrap();
    doc.sign(
        SignOptions::default().with_container_size(4096),
        |bytes| async move { Ok(build_cms(&bytes, &CmsBuild::default())) },
    )
    .await
    .unwrap();

    // No timestamp inside the CMS; archive one in the VRI instead,
    // imprinted over the signature value as RFC 3161 prescribes
    let handle = &doc.signatures()[0];
    let thumbprint = Dss::thumbprint(&handle.contents_raw);
    let container = pdf_signet::CmsContainer::parse(&handle.contents_raw).unwrap();
    let signature_value = container.exactly_one_signer().unwrap().signature().to_vec();
    let token = build_timestamp_token(&signature_value);
    doc.dss_mut().add_timestamp(&token, &thumbprint);

    let store = store_with_root_and_crl();
    let options = VerifyOptions {
        check_date: Some(check_date()),
        store: &store,
        fetcher: None,
    };
    let report = &doc.verify(&options).await[0];

    let state = report.state("signing_time").unwrap();
    assert_eq!(state.severity, Severity::Valid);
    match &state.detail {
        StateDetail::SigningTime { source, .. } => {
            assert_eq!(*source, SigningTimeSource::Timestamp)
        }
        other => panic!("unexpected detail {:?}", other),
    }
    assert_eq!(
        report.state("timestamp_trust").unwrap().severity,
        Severity::Valid
    );
}

#[tokio::test]
async fn dirty_dss_persists_into_the_next_revision() {
    let mut doc = SigningDocument::new(minimal_test_pdf()).unwrap();
    doc.dss_mut().add(LEAF_DER, None).unwrap();
    doc.dss_mut().add(CRL_DER, None).unwrap();

    let signed = doc
        .sign(
            SignOptions::default().with_container_size(4096),
            |bytes| async move { Ok(build_cms(&bytes, &CmsBuild::default())) },
        )
        .await
        .unwrap();

    let tail = String::from_utf8_lossy(&signed);
    assert!(tail.contains("/DSS"));
    assert!(tail.contains("/Certs"));
    assert!(tail.contains("/CRLs"));
    // fixtures declare PDF 1.7, so the extension marker must be present
    assert!(tail.contains("/ESIC"));

    // the signature still verifies with the DSS objects embedded
    let store = store_with_root_and_crl();
    let options = VerifyOptions {
        check_date: Some(check_date()),
        store: &store,
        fetcher: None,
    };
    assert!(doc.verify(&options).await[0].verification_result);
}
