//! JWS signing for ACME requests
//!
//! Every ACME POST body is a flattened JWS (RFC 7515 §7.2.2): base64url
//! protected header, base64url payload, base64url signature. The signing
//! algorithm is derived from the account key: RSA keys sign RS256, EC keys
//! sign ES256/ES384/ES512 depending on the curve.
//!
//! ECDSA signatures are emitted in the raw `R || S` form JOSE requires
//! (RFC 7518 §3.4), with both halves padded to the curve coordinate width.
//! OpenSSL produces DER; the conversion lives here so no caller can
//! accidentally ship a DER signature.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use openssl::bn::BigNumContext;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::{hash, MessageDigest};
use openssl::nid::Nid;
use openssl::pkey::{Id, PKeyRef, Private};
use openssl::sign::Signer;
use serde_json::{json, Value};

use super::error::AcmeError;

/// base64url without padding, the only encoding JOSE uses
pub(crate) fn b64url(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// JWS signature algorithm chosen from the account key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwsAlgorithm {
    Rs256,
    Es256,
    Es384,
    Es512,
}

impl JwsAlgorithm {
    /// Pick the algorithm for a key (RFC 7518 §3.1)
    pub fn for_key(key: &PKeyRef<Private>) -> Result<Self, AcmeError> {
        match key.id() {
            Id::RSA => Ok(JwsAlgorithm::Rs256),
            Id::EC => {
                let ec = key.ec_key().map_err(|e| AcmeError::Signing(e.to_string()))?;
                match ec.group().curve_name() {
                    Some(Nid::X9_62_PRIME256V1) => Ok(JwsAlgorithm::Es256),
                    Some(Nid::SECP384R1) => Ok(JwsAlgorithm::Es384),
                    Some(Nid::SECP521R1) => Ok(JwsAlgorithm::Es512),
                    _ => Err(AcmeError::Algorithm),
                }
            }
            _ => Err(AcmeError::Algorithm),
        }
    }

    /// Header value
    pub fn as_str(&self) -> &'static str {
        match self {
            JwsAlgorithm::Rs256 => "RS256",
            JwsAlgorithm::Es256 => "ES256",
            JwsAlgorithm::Es384 => "ES384",
            JwsAlgorithm::Es512 => "ES512",
        }
    }

    fn digest(&self) -> MessageDigest {
        match self {
            JwsAlgorithm::Rs256 | JwsAlgorithm::Es256 => MessageDigest::sha256(),
            JwsAlgorithm::Es384 => MessageDigest::sha384(),
            JwsAlgorithm::Es512 => MessageDigest::sha512(),
        }
    }
}

/// NIST name of an EC curve, for the JWK `crv` field
fn nist_curve_name(nid: Nid) -> Result<&'static str, AcmeError> {
    match nid {
        Nid::X9_62_PRIME256V1 => Ok("P-256"),
        Nid::SECP384R1 => Ok("P-384"),
        Nid::SECP521R1 => Ok("P-521"),
        _ => Err(AcmeError::Algorithm),
    }
}

/// EC coordinate width in bytes; the P-521 field is not byte-aligned
fn coordinate_len(key: &PKeyRef<Private>) -> usize {
    (key.bits() as usize + 7) / 8
}

/// Public JWK of the account key (RFC 7517)
///
/// `serde_json` maps are ordered, so serializing this value yields the
/// lexicographic member order RFC 7638 wants for thumbprinting.
pub fn public_jwk(key: &PKeyRef<Private>) -> Result<Value, AcmeError> {
    let sign_err = |e: openssl::error::ErrorStack| AcmeError::Signing(e.to_string());

    match key.id() {
        Id::RSA => {
            let rsa = key.rsa().map_err(sign_err)?;
            Ok(json!({
                "kty": "RSA",
                "n": b64url(rsa.n().to_vec()),
                "e": b64url(rsa.e().to_vec()),
            }))
        }
        Id::EC => {
            let ec = key.ec_key().map_err(sign_err)?;
            let group = ec.group();
            let nid = group.curve_name().ok_or(AcmeError::Algorithm)?;

            let mut ctx = BigNumContext::new().map_err(sign_err)?;
            let mut x = openssl::bn::BigNum::new().map_err(sign_err)?;
            let mut y = openssl::bn::BigNum::new().map_err(sign_err)?;
            ec.public_key()
                .affine_coordinates(group, &mut x, &mut y, &mut ctx)
                .map_err(sign_err)?;

            let len = coordinate_len(key) as i32;
            Ok(json!({
                "kty": "EC",
                "crv": nist_curve_name(nid)?,
                "x": b64url(x.to_vec_padded(len).map_err(sign_err)?),
                "y": b64url(y.to_vec_padded(len).map_err(sign_err)?),
            }))
        }
        _ => Err(AcmeError::Algorithm),
    }
}

/// RFC 7638 JWK thumbprint of the account key, base64url encoded
pub fn thumbprint(key: &PKeyRef<Private>) -> Result<String, AcmeError> {
    let jwk = public_jwk(key)?;
    let canonical =
        serde_json::to_string(&jwk).map_err(|e| AcmeError::Signing(e.to_string()))?;
    let digest = hash(MessageDigest::sha256(), canonical.as_bytes())
        .map_err(|e| AcmeError::Signing(e.to_string()))?;
    Ok(b64url(&digest))
}

/// Key authorization for a challenge token (RFC 8555 §8.1)
pub fn key_authorization(token: &str, thumbprint: &str) -> String {
    format!("{token}.{thumbprint}")
}

/// TXT record value for a DNS-01 challenge (RFC 8555 §8.4)
pub fn dns01_record_value(key_authorization: &str) -> Result<String, AcmeError> {
    let digest = hash(MessageDigest::sha256(), key_authorization.as_bytes())
        .map_err(|e| AcmeError::Signing(e.to_string()))?;
    Ok(b64url(&digest))
}

/// Convert an OpenSSL DER ECDSA signature to padded `R || S`
fn ecdsa_der_to_raw(der: &[u8], coord_len: usize) -> Result<Vec<u8>, AcmeError> {
    let sig = EcdsaSig::from_der(der).map_err(|e| AcmeError::Signing(e.to_string()))?;
    let mut raw = sig
        .r()
        .to_vec_padded(coord_len as i32)
        .map_err(|e| AcmeError::Signing(e.to_string()))?;
    raw.extend(
        sig.s()
            .to_vec_padded(coord_len as i32)
            .map_err(|e| AcmeError::Signing(e.to_string()))?,
    );
    Ok(raw)
}

/// Sign one ACME request and return the flattened JWS body
///
/// The protected header carries `alg`, `nonce`, `url` and exactly one of
/// `kid` (once the account URL is known) or `jwk` (before that). An empty
/// `payload` produces the empty-string payload of a POST-as-GET.
pub fn sign_flattened(
    key: &PKeyRef<Private>,
    kid: Option<&str>,
    nonce: &str,
    url: &str,
    payload: &str,
) -> Result<String, AcmeError> {
    let alg = JwsAlgorithm::for_key(key)?;

    let protected = match kid {
        Some(kid) => json!({
            "alg": alg.as_str(),
            "kid": kid,
            "nonce": nonce,
            "url": url,
        }),
        None => json!({
            "alg": alg.as_str(),
            "jwk": public_jwk(key)?,
            "nonce": nonce,
            "url": url,
        }),
    };

    let b64_protected = b64url(
        serde_json::to_string(&protected)
            .map_err(|e| AcmeError::Signing(e.to_string()))?
            .as_bytes(),
    );
    let b64_payload = b64url(payload.as_bytes());

    let sign_err = |e: openssl::error::ErrorStack| AcmeError::Signing(e.to_string());
    let mut signer = Signer::new(alg.digest(), key).map_err(sign_err)?;
    signer.update(b64_protected.as_bytes()).map_err(sign_err)?;
    signer.update(b".").map_err(sign_err)?;
    signer.update(b64_payload.as_bytes()).map_err(sign_err)?;
    let mut signature = signer.sign_to_vec().map_err(sign_err)?;

    if key.id() == Id::EC {
        signature = ecdsa_der_to_raw(&signature, coordinate_len(key))?;
    }

    serde_json::to_string(&json!({
        "protected": b64_protected,
        "payload": b64_payload,
        "signature": b64url(&signature),
    }))
    .map_err(|e| AcmeError::Signing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::bn::BigNum;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::sign::Verifier;

    fn rsa_key(bits: u32) -> PKey<Private> {
        PKey::from_rsa(Rsa::generate(bits).unwrap()).unwrap()
    }

    fn ec_key(nid: Nid) -> PKey<Private> {
        let group = EcGroup::from_curve_name(nid).unwrap();
        PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
    }

    fn decode_jws(jws: &str) -> (Value, String, Vec<u8>, String, String) {
        let body: Value = serde_json::from_str(jws).unwrap();
        let b64_protected = body["protected"].as_str().unwrap().to_string();
        let b64_payload = body["payload"].as_str().unwrap().to_string();
        let protected: Value = serde_json::from_slice(
            &URL_SAFE_NO_PAD.decode(&b64_protected).unwrap(),
        )
        .unwrap();
        let payload = String::from_utf8(URL_SAFE_NO_PAD.decode(&b64_payload).unwrap()).unwrap();
        let signature = URL_SAFE_NO_PAD
            .decode(body["signature"].as_str().unwrap())
            .unwrap();
        (protected, payload, signature, b64_protected, b64_payload)
    }

    #[test]
    fn algorithm_selection_per_key_type() {
        assert_eq!(
            JwsAlgorithm::for_key(&rsa_key(2048)).unwrap(),
            JwsAlgorithm::Rs256
        );
        assert_eq!(
            JwsAlgorithm::for_key(&ec_key(Nid::X9_62_PRIME256V1)).unwrap(),
            JwsAlgorithm::Es256
        );
        assert_eq!(
            JwsAlgorithm::for_key(&ec_key(Nid::SECP384R1)).unwrap(),
            JwsAlgorithm::Es384
        );
        assert_eq!(
            JwsAlgorithm::for_key(&ec_key(Nid::SECP521R1)).unwrap(),
            JwsAlgorithm::Es512
        );
    }

    #[test]
    fn unsupported_key_types_are_rejected() {
        let key = PKey::generate_ed25519().unwrap();
        let err = JwsAlgorithm::for_key(&key).unwrap_err();
        assert_eq!(err.to_string(), "couldn't choose a JWK algorithm");
    }

    #[test]
    fn thumbprint_is_stable_and_unpadded() {
        let key = ec_key(Nid::X9_62_PRIME256V1);
        let a = thumbprint(&key).unwrap();
        let b = thumbprint(&key).unwrap();
        assert_eq!(a, b);
        // base64url(SHA-256) without padding
        assert_eq!(a.len(), 43);
        assert!(!a.contains('='));
    }

    #[test]
    fn thumbprint_ignores_serialization_whitespace() {
        // RFC 7638: the digest is over the canonical compact form, so a
        // whitespace-laden rendering of the same JWK must re-canonicalize
        // to the same thumbprint
        let key = rsa_key(2048);
        let jwk = public_jwk(&key).unwrap();

        let pretty = serde_json::to_string_pretty(&jwk).unwrap();
        assert!(pretty.contains('\n'));
        let reparsed: Value = serde_json::from_str(&pretty).unwrap();
        let canonical = serde_json::to_string(&reparsed).unwrap();

        let digest = hash(MessageDigest::sha256(), canonical.as_bytes()).unwrap();
        assert_eq!(thumbprint(&key).unwrap(), b64url(&digest));
    }

    #[test]
    fn protected_header_uses_jwk_before_kid() {
        let key = ec_key(Nid::SECP384R1);
        let jws = sign_flattened(&key, None, "nonce-1", "https://ca/acme/new-acct", "{}").unwrap();
        let (protected, _, _, _, _) = decode_jws(&jws);

        assert_eq!(protected["alg"], "ES384");
        assert_eq!(protected["nonce"], "nonce-1");
        assert_eq!(protected["url"], "https://ca/acme/new-acct");
        assert!(protected.get("jwk").is_some());
        assert!(protected.get("kid").is_none());
    }

    #[test]
    fn protected_header_uses_kid_after_account_creation() {
        let key = ec_key(Nid::SECP384R1);
        let jws = sign_flattened(
            &key,
            Some("https://ca/acme/acct/17"),
            "nonce-2",
            "https://ca/acme/new-order",
            r#"{"identifiers":[]}"#,
        )
        .unwrap();
        let (protected, payload, _, _, _) = decode_jws(&jws);

        assert_eq!(protected["kid"], "https://ca/acme/acct/17");
        assert!(protected.get("jwk").is_none());
        assert_eq!(payload, r#"{"identifiers":[]}"#);
    }

    #[test]
    fn empty_payload_encodes_as_empty_string() {
        let key = ec_key(Nid::X9_62_PRIME256V1);
        let jws = sign_flattened(&key, Some("kid"), "n", "https://ca/authz/1", "").unwrap();
        let body: Value = serde_json::from_str(&jws).unwrap();
        assert_eq!(body["payload"], "");
    }

    #[test]
    fn ecdsa_signatures_are_raw_and_padded() {
        for (nid, expected_len) in [
            (Nid::X9_62_PRIME256V1, 64),
            (Nid::SECP384R1, 96),
            (Nid::SECP521R1, 132),
        ] {
            let key = ec_key(nid);
            let jws = sign_flattened(&key, Some("kid"), "n", "https://ca/x", "{}").unwrap();
            let (_, _, signature, _, _) = decode_jws(&jws);
            assert_eq!(signature.len(), expected_len, "curve {nid:?}");
        }
    }

    #[test]
    fn rsa_signature_verifies_against_the_public_key() {
        let key = rsa_key(2048);
        let jws = sign_flattened(&key, None, "nonce", "https://ca/x", r#"{"a":1}"#).unwrap();
        let (_, _, signature, b64_protected, b64_payload) = decode_jws(&jws);

        let mut verifier = Verifier::new(MessageDigest::sha256(), &key).unwrap();
        verifier.update(b64_protected.as_bytes()).unwrap();
        verifier.update(b".").unwrap();
        verifier.update(b64_payload.as_bytes()).unwrap();
        assert!(verifier.verify(&signature).unwrap());
    }

    #[test]
    fn ecdsa_signature_verifies_against_the_public_key() {
        let key = ec_key(Nid::SECP521R1);
        let jws = sign_flattened(&key, None, "nonce", "https://ca/x", r#"{"a":1}"#).unwrap();
        let (_, _, signature, b64_protected, b64_payload) = decode_jws(&jws);

        // Rebuild a DER signature from raw R || S for OpenSSL verification
        let coord = signature.len() / 2;
        let sig = EcdsaSig::from_private_components(
            BigNum::from_slice(&signature[..coord]).unwrap(),
            BigNum::from_slice(&signature[coord..]).unwrap(),
        )
        .unwrap();
        let der = sig.to_der().unwrap();

        let mut verifier = Verifier::new(MessageDigest::sha512(), &key).unwrap();
        verifier.update(b64_protected.as_bytes()).unwrap();
        verifier.update(b".").unwrap();
        verifier.update(b64_payload.as_bytes()).unwrap();
        assert!(verifier.verify(&der).unwrap());
    }

    #[test]
    fn key_authorization_joins_token_and_thumbprint() {
        let key = ec_key(Nid::X9_62_PRIME256V1);
        let tp = thumbprint(&key).unwrap();
        let auth = key_authorization("tok-abc", &tp);
        assert_eq!(auth, format!("tok-abc.{tp}"));

        let record = dns01_record_value(&auth).unwrap();
        assert_eq!(record.len(), 43);
    }
}
