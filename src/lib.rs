// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::match_like_matches_macro)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]

//! # PDF Signet
//!
//! PDF digital signatures in Rust: ByteRange signing, CMS verification,
//! certificate chains with revocation, and long-term validation.
//!
//! ## Core Features
//!
//! ### Signing
//! - **Placeholder protocol**: reserve an oversized `/Contents` value and
//!   fixed-width `/ByteRange`, serialize once, patch in place — the file
//!   length never changes after serialization
//! - **External signer**: the cryptographic container is produced by an
//!   async callback; this crate computes exactly what it must cover
//! - **Incremental updates**: signatures append after the last `%%EOF`,
//!   previously signed revisions stay byte-identical
//! - **Certification signatures**: DocMDP `/Reference` transforms
//!
//! ### Verification
//! - **Structured reports**: a never-throwing orchestrator accumulating
//!   typed [`types::SignatureState`] entries — parse failures, formatting
//!   deviations, modification, identity and timestamp trust
//! - **Certificate chains**: DN-matched paths with offline/online
//!   revocation (CRL and OCSP), evaluated at the caller's check date
//! - **RFC 3161 timestamps**: embedded tokens and document timestamps
//! - **LTV / DSS**: a document security store with per-signature VRI
//!   records, deduplicated and append-only
//!
//! ## Quick Start
//!
//! ```ignore
//! use pdf_signet::{SigningDocument, SignOptions, VerifyOptions, CertificateStore};
//!
//! # async fn demo() -> pdf_signet::Result<()> {
//! let mut doc = SigningDocument::new(std::fs::read("contract.pdf")?)?;
//!
//! // Sign: the callback receives the exact bytes the signature covers
//! let signed = doc
//!     .sign(SignOptions::default().with_reason("Approved"), |bytes| async move {
//!         my_hsm_sign(&bytes).await
//!     })
//!     .await?;
//! std::fs::write("contract-signed.pdf", &signed)?;
//!
//! // Verify: always returns a full report, never throws
//! let mut store = CertificateStore::new();
//! store.add_trusted_root(std::fs::read("root-ca.der")?);
//! let options = VerifyOptions { check_date: None, store: &store, fetcher: None };
//! for report in doc.verify(&options).await {
//!     println!("{}: {}", report.field_name.as_deref().unwrap_or("?"),
//!              report.verification_result);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Specification References
//!
//! - ISO 32000-1:2008 / ISO 32000-2:2020 Section 12.8 — Digital Signatures
//! - ETSI EN 319 142 — PAdES
//! - RFC 5652 — Cryptographic Message Syntax
//! - RFC 3161 — Time-Stamp Protocol
//! - RFC 6960 — OCSP
//!
//! ## License
//!
//! Licensed under either of:
//!
//! * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//! * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Error handling
pub mod error;

// Core signature machinery
pub mod byterange;
pub mod document;
pub mod signer;
pub mod types;

// Cryptographic containers and evidence
pub mod container;
pub mod oids;
pub mod revocation;
pub mod timestamp;

// Trust decisions
pub mod chain;
pub mod dss;
pub mod verifier;

pub use byterange::{ByteRange, ByteRangeCalculator};
pub use chain::{
    BuildOptions, CertificateChainResult, CertificateStore, ChainBuilder, ChainCode,
    RevocationFetcher, RevocationMode,
};
pub use container::{CmsContainer, CmsSignerInfo, SignerVerdict};
pub use document::{SignatureHandle, SigningDocument};
pub use dss::{Dss, Vri};
pub use error::{Error, Result};
pub use revocation::{Crl, DssObjectKind, Ocsp, OcspCertStatus, RevocationEvidence};
pub use timestamp::{TimestampToken, TimestampVerifyResult};
pub use types::{
    CertificationLevel, DigestAlgorithm, IdentityVerdict, ModificationVerdict, SignatureInfo,
    SignatureKind, SignatureState, SignatureSubFilter, SignatureVerifyResult, SignOptions,
    Severity, SigningTimeSource, StateDetail,
};
pub use verifier::{verify_signature, VerifyOptions};
