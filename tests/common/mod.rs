//! Shared test scaffolding: a real CMS builder over the openssl-generated
//! fixtures, so the verification pipeline is exercised with genuine
//! cryptography.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::revocation::{RevocationInfoChoice, RevocationInfoChoices};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo,
    SignerInfos,
};
use der::asn1::{GeneralizedTime, Int, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::{Any, Decode, Encode};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use signature::{SignatureEncoding, Signer};
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::Certificate;

use pdf_signet::chain::CertificateStore;
use pdf_signet::oids;

pub const ROOT_DER: &[u8] = include_bytes!("../fixtures/root.der");
pub const LEAF_DER: &[u8] = include_bytes!("../fixtures/leaf.der");
pub const LEAF_KEY_DER: &[u8] = include_bytes!("../fixtures/leaf_key.der");
pub const REVOKED_DER: &[u8] = include_bytes!("../fixtures/revoked.der");
pub const REVOKED_KEY_DER: &[u8] = include_bytes!("../fixtures/revoked_key.der");
pub const CRL_DER: &[u8] = include_bytes!("../fixtures/crl.der");
pub const OCSP_GOOD: &[u8] = include_bytes!("../fixtures/ocsp_good.der");

/// Which fixture identity signs the container.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum FixtureSigner {
    /// The good leaf certificate
    Leaf,
    /// The leaf revoked by the fixture CRL
    Revoked,
}

/// Route `log` output into the test harness.
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A check date inside the fixtures' validity window.
pub fn check_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2027, 6, 1, 12, 0, 0).unwrap()
}

/// A store trusting the fixture root, with the fixture CRL available for
/// offline revocation checking.
pub fn store_with_root_and_crl() -> CertificateStore {
    let mut store = CertificateStore::new();
    store.add_trusted_root(ROOT_DER.to_vec());
    store.add_crl(pdf_signet::Crl::parse(CRL_DER).unwrap());
    store
}

/// Knobs for [`build_cms`].
pub struct CmsBuild {
    /// Embed the signer certificate in the container
    pub embed_certificate: bool,
    /// Embed the fixture CRL (makes the signature LTV)
    pub embed_crl: bool,
    /// Add a signing-time signed attribute
    pub signing_time: Option<DateTime<Utc>>,
    /// Attach an RFC 3161 countersignature over the signature value
    pub with_timestamp: bool,
    /// Which fixture identity signs
    pub signer: FixtureSigner,
}

impl Default for CmsBuild {
    fn default() -> Self {
        Self {
            embed_certificate: true,
            embed_crl: false,
            signing_time: None,
            with_timestamp: false,
            signer: FixtureSigner::Leaf,
        }
    }
}

fn sha256_alg() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: oids::ID_SHA256,
        parameters: None,
    }
}

fn rsa_alg() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: oids::RSA_ENCRYPTION,
        parameters: None,
    }
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Attribute {
    Attribute {
        oid,
        values: SetOfVec::try_from(vec![value]).unwrap(),
    }
}

fn identity(signer: FixtureSigner) -> (IssuerAndSerialNumber, Certificate) {
    let der = match signer {
        FixtureSigner::Leaf => LEAF_DER,
        FixtureSigner::Revoked => REVOKED_DER,
    };
    let cert = Certificate::from_der(der).unwrap();
    let ias = IssuerAndSerialNumber {
        issuer: cert.tbs_certificate.issuer.clone(),
        serial_number: cert.tbs_certificate.serial_number.clone(),
    };
    (ias, cert)
}

fn signing_key(signer: FixtureSigner) -> SigningKey<Sha256> {
    let der = match signer {
        FixtureSigner::Leaf => LEAF_KEY_DER,
        FixtureSigner::Revoked => REVOKED_KEY_DER,
    };
    let key = RsaPrivateKey::from_pkcs8_der(der).unwrap();
    SigningKey::<Sha256>::new(key)
}

/// Build a detached CMS SignedData over `content`, signed with the
/// fixture leaf key. This is what a production signer callback produces;
/// tests use it to drive the whole pipeline with real signatures.
pub fn build_cms(content: &[u8], build: &CmsBuild) -> Vec<u8> {
    let (ias, cert) = identity(build.signer);

    // Signed attributes: content-type, message-digest, optional
    // signing-time.
    let digest = Sha256::digest(content);
    let mut attrs = vec![
        attribute(
            oids::ID_CONTENT_TYPE,
            Any::encode_from(&oids::ID_DATA).unwrap(),
        ),
        attribute(
            oids::ID_MESSAGE_DIGEST,
            Any::encode_from(&OctetString::new(digest.to_vec()).unwrap()).unwrap(),
        ),
    ];
    if let Some(time) = build.signing_time {
        let utc = UtcTime::from_unix_duration(std::time::Duration::from_secs(
            time.timestamp() as u64,
        ))
        .unwrap();
        attrs.push(attribute(
            oids::ID_SIGNING_TIME,
            Any::encode_from(&utc).unwrap(),
        ));
    }
    let signed_attrs = SetOfVec::try_from(attrs).unwrap();

    // The signature covers the attributes under their SET OF tag.
    let message = signed_attrs.to_der().unwrap();
    let signature = signing_key(build.signer).sign(&message).to_vec();

    let unsigned_attrs = build.with_timestamp.then(|| {
        let token = build_timestamp_token(&signature);
        SetOfVec::try_from(vec![attribute(
            oids::ID_AA_TIME_STAMP_TOKEN,
            Any::from_der(&token).unwrap(),
        )])
        .unwrap()
    });

    let signer_info = SignerInfo {
        version: CmsVersion::V1,
        sid: SignerIdentifier::IssuerAndSerialNumber(ias),
        digest_alg: sha256_alg(),
        signed_attrs: Some(signed_attrs),
        signature_algorithm: rsa_alg(),
        signature: OctetString::new(signature).unwrap(),
        unsigned_attrs,
    };

    let certificates = build.embed_certificate.then(|| {
        CertificateSet(
            SetOfVec::try_from(vec![CertificateChoices::Certificate(cert)]).unwrap(),
        )
    });

    let crls = build.embed_crl.then(|| {
        let list = x509_cert::crl::CertificateList::from_der(CRL_DER).unwrap();
        RevocationInfoChoices(
            SetOfVec::try_from(vec![RevocationInfoChoice::Crl(list)]).unwrap(),
        )
    });

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::try_from(vec![sha256_alg()]).unwrap(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: oids::ID_DATA,
            econtent: None,
        },
        certificates,
        crls,
        signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info]).unwrap()),
    };

    let content_info = ContentInfo {
        content_type: oids::ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data).unwrap(),
    };
    content_info.to_der().unwrap()
}

/// Build an RFC 3161 timestamp token whose message imprint covers
/// `imprinted`, countersigned with the fixture leaf key.
pub fn build_timestamp_token(imprinted: &[u8]) -> Vec<u8> {
    let (ias, cert) = identity(FixtureSigner::Leaf);

    let tst_info = x509_tsp::TstInfo {
        version: x509_tsp::TspVersion::V1,
        policy: ObjectIdentifier::new_unwrap("1.2.3.4.1"),
        message_imprint: x509_tsp::MessageImprint {
            hash_algorithm: sha256_alg(),
            hashed_message: OctetString::new(Sha256::digest(imprinted).to_vec()).unwrap(),
        },
        serial_number: Int::new(&[0x01, 0x42]).unwrap(),
        gen_time: GeneralizedTime::from_unix_duration(std::time::Duration::from_secs(
            check_date().timestamp() as u64 - 60,
        ))
        .unwrap(),
        accuracy: None,
        ordering: false,
        nonce: None,
        tsa: None,
        extensions: None,
    };
    let tst_der = tst_info.to_der().unwrap();

    // The countersignature's message-digest attribute covers the TSTInfo.
    let digest = Sha256::digest(&tst_der);
    let signed_attrs = SetOfVec::try_from(vec![
        attribute(
            oids::ID_CONTENT_TYPE,
            Any::encode_from(&oids::ID_CT_TST_INFO).unwrap(),
        ),
        attribute(
            oids::ID_MESSAGE_DIGEST,
            Any::encode_from(&OctetString::new(digest.to_vec()).unwrap()).unwrap(),
        ),
    ])
    .unwrap();
    let message = signed_attrs.to_der().unwrap();
    let signature = signing_key(FixtureSigner::Leaf).sign(&message).to_vec();

    let signer_info = SignerInfo {
        version: CmsVersion::V1,
        sid: SignerIdentifier::IssuerAndSerialNumber(ias),
        digest_alg: sha256_alg(),
        signed_attrs: Some(signed_attrs),
        signature_algorithm: rsa_alg(),
        signature: OctetString::new(signature).unwrap(),
        unsigned_attrs: None,
    };

    let signed_data = SignedData {
        version: CmsVersion::V3,
        digest_algorithms: SetOfVec::try_from(vec![sha256_alg()]).unwrap(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: oids::ID_CT_TST_INFO,
            econtent: Some(Any::encode_from(&OctetString::new(tst_der).unwrap()).unwrap()),
        },
        certificates: Some(CertificateSet(
            SetOfVec::try_from(vec![CertificateChoices::Certificate(cert)]).unwrap(),
        )),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info]).unwrap()),
    };

    let content_info = ContentInfo {
        content_type: oids::ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data).unwrap(),
    };
    content_info.to_der().unwrap()
}
