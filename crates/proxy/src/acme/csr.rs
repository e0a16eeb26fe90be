//! Leaf key generation and PKCS#10 CSR construction
//!
//! The CSR is built from the renewal's freshly generated leaf key and the
//! store entry's DNS names: the first name becomes the subject CN and every
//! name lands in a single subjectAltName extension. The account key is
//! never involved here.

use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509NameBuilder, X509ReqBuilder};

use rampart_config::{Curve, KeyPolicy};

use super::error::AcmeError;

/// OpenSSL NID for a configured curve
fn curve_nid(curve: Curve) -> Nid {
    match curve {
        Curve::P256 => Nid::X9_62_PRIME256V1,
        Curve::P384 => Nid::SECP384R1,
        Curve::P521 => Nid::SECP521R1,
    }
}

/// Generate a fresh leaf private key following the configured policy
pub fn generate_leaf_key(policy: &KeyPolicy) -> Result<PKey<Private>, AcmeError> {
    let key_err = |e: openssl::error::ErrorStack| AcmeError::KeyGeneration(e.to_string());

    match policy {
        KeyPolicy::Rsa { bits } => {
            let rsa = Rsa::generate(*bits).map_err(key_err)?;
            PKey::from_rsa(rsa).map_err(key_err)
        }
        KeyPolicy::Ecdsa { curve } => {
            let group = EcGroup::from_curve_name(curve_nid(*curve)).map_err(key_err)?;
            let ec = EcKey::generate(&group).map_err(key_err)?;
            PKey::from_ec_key(ec).map_err(key_err)
        }
    }
}

/// Build a SHA-256 signed PKCS#10 CSR covering every DNS name
///
/// Returns the DER encoding, ready for base64url in the finalize payload.
pub fn build_csr(key: &PKeyRef<Private>, names: &[String]) -> Result<Vec<u8>, AcmeError> {
    let csr_err = |e: openssl::error::ErrorStack| AcmeError::Csr(e.to_string());

    let first = names
        .first()
        .ok_or_else(|| AcmeError::Csr("the certificate has no DNS name".to_string()))?;

    let mut builder = X509ReqBuilder::new().map_err(csr_err)?;
    builder.set_pubkey(key).map_err(csr_err)?;

    let mut subject = X509NameBuilder::new().map_err(csr_err)?;
    subject
        .append_entry_by_nid(Nid::COMMONNAME, first)
        .map_err(csr_err)?;
    builder.set_subject_name(&subject.build()).map_err(csr_err)?;

    let mut san = SubjectAlternativeName::new();
    for name in names {
        san.dns(name);
    }
    let extension = san.build(&builder.x509v3_context(None)).map_err(csr_err)?;
    let mut extensions = Stack::new().map_err(csr_err)?;
    extensions.push(extension).map_err(csr_err)?;
    builder.add_extensions(&extensions).map_err(csr_err)?;

    builder.sign(key, MessageDigest::sha256()).map_err(csr_err)?;
    builder.build().to_der().map_err(csr_err)
}
