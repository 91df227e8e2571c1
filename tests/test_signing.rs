//! End-to-end signing tests: the placeholder-reserve-then-patch protocol
//! over a real document with a real CMS signer callback.

mod common;

use common::{build_cms, CmsBuild};
use pdf_signet::document::minimal_test_pdf;
use pdf_signet::{Error, SignOptions, SigningDocument};

#[tokio::test]
async fn byte_range_invariants_hold_on_signed_document() {
    let mut doc = SigningDocument::new(minimal_test_pdf()).unwrap();
    let signed = doc
        .sign(
            SignOptions::default().with_container_size(2048),
            |bytes| async move { Ok(build_cms(&bytes, &CmsBuild::default())) },
        )
        .await
        .unwrap();

    let sigs = doc.signatures();
    assert_eq!(sigs.len(), 1);
    let range = &sigs[0].byte_range;

    // [0, b, c, d] with b = offset of the hex value, c = b + its width,
    // b + d + width = total file length
    assert_eq!(range.start(), 0);
    assert_eq!(range.before_len() as usize, sigs[0].contents_offset);
    assert_eq!(
        range.after_offset(),
        range.before_len() + sigs[0].contents_width as i64
    );
    assert_eq!(range.end() as usize, signed.len());
    assert_eq!(
        range.covered_len() as usize + sigs[0].contents_width,
        signed.len()
    );
}

#[tokio::test]
async fn contents_is_even_length_hex_with_zero_padding() {
    let mut doc = SigningDocument::new(minimal_test_pdf()).unwrap();
    let signed = doc
        .sign(
            SignOptions::default().with_container_size(2048),
            |bytes| async move { Ok(build_cms(&bytes, &CmsBuild::default())) },
        )
        .await
        .unwrap();

    let sig = &doc.signatures()[0];
    let hex_region = &signed[sig.contents_offset + 1..sig.contents_offset + sig.contents_width - 1];
    assert_eq!(hex_region.len() % 2, 0);
    assert!(hex_region.iter().all(|b| b.is_ascii_hexdigit()));
    // the unused tail is ASCII '0', not NUL
    assert_eq!(*hex_region.last().unwrap(), b'0');
}

#[tokio::test]
async fn oversized_container_fails_without_saving() {
    let mut doc = SigningDocument::new(minimal_test_pdf()).unwrap();
    let before = doc.bytes().to_vec();

    // A real CMS with certificate is far larger than 16 bytes
    let result = doc
        .sign(
            SignOptions::default().with_container_size(16),
            |bytes| async move { Ok(build_cms(&bytes, &CmsBuild::default())) },
        )
        .await;

    assert!(matches!(result, Err(Error::Protocol(_))));
    assert_eq!(doc.bytes(), before.as_slice());
}

#[tokio::test]
async fn dictionary_entries_round_trip_through_the_scanner() {
    let mut doc = SigningDocument::new(minimal_test_pdf()).unwrap();
    doc.sign(
        SignOptions::default()
            .with_container_size(2048)
            .with_field_name("ApprovalSig")
            .with_reason("Contract approval")
            .with_location("Berlin"),
        |bytes| async move { Ok(build_cms(&bytes, &CmsBuild::default())) },
    )
    .await
    .unwrap();

    let sig = &doc.signatures()[0];
    assert_eq!(sig.info.field_name.as_deref(), Some("ApprovalSig"));
    assert_eq!(sig.info.reason.as_deref(), Some("Contract approval"));
    assert_eq!(sig.info.location.as_deref(), Some("Berlin"));
    assert!(sig
        .info
        .signing_time
        .as_deref()
        .map(|m| m.starts_with("D:"))
        .unwrap_or(false));
}
