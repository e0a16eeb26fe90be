//! Shared fixtures for the ACME integration tests

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509Builder, X509NameBuilder};
use parking_lot::Mutex;

use rampart_config::Config;
use rampart_proxy::acme::{AcmeError, AcmeRegistry, AcmeTransport, StepRequest, StepResponse};
use rampart_proxy::store::{CertStore, StoreEntry};

/// Self-signed certificate and key PEM covering the given names
pub fn self_signed(names: &[&str]) -> (String, String) {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut subject = X509NameBuilder::new().unwrap();
    subject
        .append_entry_by_nid(Nid::COMMONNAME, names[0])
        .unwrap();
    let subject = subject.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&subject).unwrap();
    builder.set_issuer_name(&subject).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(90).unwrap())
        .unwrap();
    builder.set_pubkey(&key).unwrap();

    let mut san = SubjectAlternativeName::new();
    for name in names {
        san.dns(name);
    }
    let san = san.build(&builder.x509v3_context(None, None)).unwrap();
    builder.append_extension(san).unwrap();

    builder.sign(&key, MessageDigest::sha256()).unwrap();

    let cert_pem = String::from_utf8(builder.build().to_pem().unwrap()).unwrap();
    let key_pem = String::from_utf8(key.private_key_to_pem_pkcs8().unwrap()).unwrap();
    (cert_pem, key_pem)
}

/// Registry with one `acme "le"` section; `extra` lines (keytype, bits,
/// challenge, ...) are appended to the section body
pub fn make_registry(dir: &Path, extra: &str) -> AcmeRegistry {
    let group = EcGroup::from_curve_name(Nid::SECP384R1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
    let key_path = dir.join("le.account.key");
    std::fs::write(&key_path, key.private_key_to_pem_pkcs8().unwrap()).unwrap();

    let kdl = format!(
        r#"
expose-experimental-directives
acme "le" {{
    directory "https://ca/dir"
    contact "admin@example.com"
    account "{}"
    {extra}
}}
"#,
        key_path.display()
    );
    let config = Config::from_str(&kdl).unwrap();
    AcmeRegistry::from_config(&config).unwrap()
}

/// Store seeded with one live entry bound to the `le` section
pub fn make_store(path: &str, names: &[&str]) -> Arc<CertStore> {
    let (cert_pem, key_pem) = self_signed(names);
    let store = Arc::new(CertStore::new());
    store.insert(StoreEntry::new(
        path,
        cert_pem,
        key_pem,
        names.iter().map(|s| s.to_string()).collect(),
        Some("le".to_string()),
    ));
    store
}

/// Scripted transport: pops one canned response per request and records
/// everything the state machine sent
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<StepResponse>>,
    requests: Mutex<Vec<StepRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<StepResponse>) -> Arc<Self> {
        Arc::new(ScriptedTransport {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<StepRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AcmeTransport for ScriptedTransport {
    async fn issue(&self, request: StepRequest) -> Result<StepResponse, AcmeError> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| AcmeError::Transport("response script exhausted".to_string()))
    }
}

/// Canned 2xx response
pub fn ok(status: u16, body: &str, nonce: Option<&str>, location: Option<&str>) -> StepResponse {
    StepResponse {
        status,
        nonce: nonce.map(String::from),
        location: location.map(String::from),
        body: body.as_bytes().to_vec(),
    }
}

/// Decode the protected header of a recorded JWS POST
pub fn protected_header(request: &StepRequest) -> serde_json::Value {
    let body: serde_json::Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
    serde_json::from_slice(
        &URL_SAFE_NO_PAD
            .decode(body["protected"].as_str().unwrap())
            .unwrap(),
    )
    .unwrap()
}

/// Decode the payload of a recorded JWS POST; empty payloads yield `null`
pub fn jws_payload(request: &StepRequest) -> serde_json::Value {
    let body: serde_json::Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
    let raw = URL_SAFE_NO_PAD
        .decode(body["payload"].as_str().unwrap())
        .unwrap();
    if raw.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&raw).unwrap()
    }
}
