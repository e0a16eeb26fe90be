//! Certificate store and TLS bindings
//!
//! The store indexes certificate entries by path. Each entry carries the
//! PEM material plus the list of TLS bindings serving it; a binding owns a
//! shared slot that a listener's certificate resolver reads on every
//! handshake. Replacing a certificate therefore means rebuilding every
//! binding of the live entry against the new material and swapping the
//! index entry, all under the single store-wide mutex.
//!
//! Writers (the renewal trigger and the hot-swap installer) use *try-lock*:
//! a busy store is reported to the caller instead of queueing, so a renewal
//! can never stall behind another certificate operation. Handshakes never
//! touch the index; they clone the `Arc` out of their slot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use openssl::pkey::{PKeyRef, Private};
use parking_lot::{Mutex, RwLock};
use rustls::crypto::CryptoProvider;
use rustls::sign::CertifiedKey;
use thiserror::Error;
use tracing::{debug, info};

use rampart_config::CertificateDecl;

/// Errors from certificate store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store-wide lock is held by another certificate operation
    #[error("operations on certificates are currently locked")]
    Locked,

    /// No entry under that path
    #[error("unknown certificate '{0}'")]
    UnknownCertificate(String),

    /// PEM material could not be loaded or parsed
    #[error("failed to load certificate '{path}': {message}")]
    Load { path: String, message: String },

    /// A TLS binding could not be rebuilt against the new entry
    #[error("failed to rebuild TLS binding '{listener}': {message}")]
    BindingRebuild { listener: String, message: String },
}

/// The slot a listener reads its certificate from
pub type CertSlot = Arc<RwLock<Arc<CertifiedKey>>>;

/// One TLS binding of a store entry
///
/// The slot is shared with the listener that serves this certificate;
/// rebuilding the binding writes a fresh [`CertifiedKey`] through it.
#[derive(Debug, Clone)]
pub struct TlsBinding {
    /// Listener this binding belongs to
    pub listener: String,
    slot: CertSlot,
}

impl TlsBinding {
    /// The certificate currently served by this binding
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        self.slot.read().clone()
    }
}

/// One certificate store entry
#[derive(Debug, Clone)]
pub struct StoreEntry {
    /// Store key: the configured certificate path
    pub path: String,
    /// DNS names this certificate covers
    pub names: Vec<String>,
    /// Name of the `acme` section renewing this entry, if any
    pub acme: Option<String>,
    /// PEM leaf certificate plus chain
    pub cert_pem: String,
    /// PEM private key
    pub key_pem: String,
    bindings: Vec<TlsBinding>,
}

impl StoreEntry {
    pub fn new(
        path: impl Into<String>,
        cert_pem: impl Into<String>,
        key_pem: impl Into<String>,
        names: Vec<String>,
        acme: Option<String>,
    ) -> Self {
        StoreEntry {
            path: path.into(),
            names,
            acme,
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
            bindings: Vec::new(),
        }
    }

    /// Duplicate this entry as a renewal write target
    ///
    /// The copy keeps the path, names and ACME binding but starts with no
    /// TLS bindings; those are rebuilt from the live entry at install time.
    pub fn duplicate(&self) -> StoreEntry {
        StoreEntry {
            path: self.path.clone(),
            names: self.names.clone(),
            acme: self.acme.clone(),
            cert_pem: self.cert_pem.clone(),
            key_pem: self.key_pem.clone(),
            bindings: Vec::new(),
        }
    }

    /// Install a freshly generated leaf key
    pub fn install_leaf_key(&mut self, key: &PKeyRef<Private>) -> Result<(), StoreError> {
        let pem = key
            .private_key_to_pem_pkcs8()
            .map_err(|e| StoreError::Load {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        self.key_pem = String::from_utf8(pem).map_err(|e| StoreError::Load {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Install the downloaded certificate chain
    ///
    /// Only the chain is replaced; the key installed by
    /// [`StoreEntry::install_leaf_key`] stays untouched.
    pub fn install_chain(&mut self, chain_pem: impl Into<String>) {
        self.cert_pem = chain_pem.into();
    }

    /// The TLS bindings currently attached to this entry
    pub fn bindings(&self) -> &[TlsBinding] {
        &self.bindings
    }

    /// Build a rustls [`CertifiedKey`] from the entry's PEM material
    pub fn certified_key(&self) -> Result<CertifiedKey, StoreError> {
        let load_err = |message: String| StoreError::Load {
            path: self.path.clone(),
            message,
        };

        let certs: Vec<_> = rustls_pemfile::certs(&mut self.cert_pem.as_bytes())
            .collect::<Result<_, _>>()
            .map_err(|e| load_err(e.to_string()))?;
        if certs.is_empty() {
            return Err(load_err("no certificates found".to_string()));
        }

        let key = rustls_pemfile::private_key(&mut self.key_pem.as_bytes())
            .map_err(|e| load_err(e.to_string()))?
            .ok_or_else(|| load_err("no private key found".to_string()))?;

        let provider = CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));
        let signing_key = provider
            .key_provider
            .load_private_key(key)
            .map_err(|e| load_err(format!("unusable private key: {e}")))?;

        Ok(CertifiedKey::new(certs, signing_key))
    }

    /// Expiry of the leaf certificate, when it parses
    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        use x509_parser::prelude::*;

        let (_, pem) = parse_x509_pem(self.cert_pem.as_bytes()).ok()?;
        let (_, cert) = X509Certificate::from_der(&pem.contents).ok()?;
        DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
    }
}

/// DNS names from a certificate's subjectAltName extension
fn subject_alt_names(cert_pem: &str) -> Result<Vec<String>, String> {
    use x509_parser::prelude::*;

    let (_, pem) = parse_x509_pem(cert_pem.as_bytes()).map_err(|e| e.to_string())?;
    let (_, cert) = X509Certificate::from_der(&pem.contents).map_err(|e| e.to_string())?;

    let mut names = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for general_name in &san.value.general_names {
            if let GeneralName::DNSName(name) = general_name {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

/// Load a store entry from a `certificate` declaration
pub fn load_entry(decl: &CertificateDecl) -> Result<StoreEntry, StoreError> {
    let read = |path: &str| {
        std::fs::read_to_string(path).map_err(|e| StoreError::Load {
            path: path.to_string(),
            message: e.to_string(),
        })
    };

    let cert_pem = read(&decl.path)?;
    let key_pem = read(&decl.key_path())?;

    let names = if decl.domains.is_empty() {
        subject_alt_names(&cert_pem).map_err(|message| StoreError::Load {
            path: decl.path.clone(),
            message,
        })?
    } else {
        decl.domains.clone()
    };

    debug!(
        path = %decl.path,
        names = ?names,
        acme = ?decl.acme,
        "Loaded certificate store entry"
    );

    Ok(StoreEntry::new(
        decl.path.clone(),
        cert_pem,
        key_pem,
        names,
        decl.acme.clone(),
    ))
}

/// The certificate store
///
/// All entries live behind one mutex; there is no per-entry locking.
#[derive(Debug, Default)]
pub struct CertStore {
    index: Mutex<HashMap<String, StoreEntry>>,
}

impl CertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry at startup
    pub fn insert(&self, entry: StoreEntry) {
        self.index.lock().insert(entry.path.clone(), entry);
    }

    /// Snapshot of one entry
    pub fn lookup(&self, path: &str) -> Option<StoreEntry> {
        self.index.lock().get(path).cloned()
    }

    /// Run a closure under the store-wide try-lock
    ///
    /// Fails with [`StoreError::Locked`] when another certificate
    /// operation holds the store.
    pub fn with_locked<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, StoreEntry>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut index = self.index.try_lock().ok_or(StoreError::Locked)?;
        f(&mut index)
    }

    /// Attach a TLS binding to an entry and hand back its slot
    ///
    /// The listener keeps the returned slot and reads the certificate from
    /// it on every handshake.
    pub fn bind(&self, path: &str, listener: &str) -> Result<CertSlot, StoreError> {
        let mut index = self.index.lock();
        let entry = index
            .get_mut(path)
            .ok_or_else(|| StoreError::UnknownCertificate(path.to_string()))?;

        let certified = Arc::new(entry.certified_key()?);
        let slot: CertSlot = Arc::new(RwLock::new(certified));
        entry.bindings.push(TlsBinding {
            listener: listener.to_string(),
            slot: slot.clone(),
        });

        debug!(path = %path, listener = %listener, "Attached TLS binding");
        Ok(slot)
    }

    /// Hot-swap installer: replace the live entry with `new_entry`
    ///
    /// Rebuilds every TLS binding of the live entry against the new
    /// material before anything is published. When all rebuilds succeed,
    /// the slots are written and the index entry is replaced in one
    /// critical section; a failed rebuild discards the partial work and
    /// leaves the live entry untouched.
    pub fn install(&self, mut new_entry: StoreEntry) -> Result<(), StoreError> {
        let mut index = self.index.try_lock().ok_or(StoreError::Locked)?;

        let live = index
            .get(&new_entry.path)
            .ok_or_else(|| StoreError::UnknownCertificate(new_entry.path.clone()))?;

        let mut rebuilt: Vec<(TlsBinding, Arc<CertifiedKey>)> = Vec::new();
        for binding in live.bindings() {
            let certified =
                new_entry
                    .certified_key()
                    .map_err(|e| StoreError::BindingRebuild {
                        listener: binding.listener.clone(),
                        message: e.to_string(),
                    })?;
            rebuilt.push((binding.clone(), Arc::new(certified)));
        }

        // Publish: write every slot, link the rebuilt bindings into the
        // new entry, replace the index entry.
        let binding_count = rebuilt.len();
        for (binding, certified) in rebuilt {
            *binding.slot.write() = certified;
            new_entry.bindings.push(binding);
        }

        let path = new_entry.path.clone();
        let expires = new_entry.not_after();
        index.insert(path.clone(), new_entry);

        info!(
            path = %path,
            bindings = binding_count,
            expires = ?expires,
            "Certificate store entry replaced"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkey::PKey;
    use openssl::x509::extension::SubjectAlternativeName;
    use openssl::x509::{X509Builder, X509NameBuilder};

    /// Self-signed certificate for store fixtures
    pub(crate) fn self_signed(names: &[&str]) -> (String, String) {
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

    fn seeded_store(path: &str, names: &[&str]) -> CertStore {
        let (cert_pem, key_pem) = self_signed(names);
        let store = CertStore::new();
        store.insert(StoreEntry::new(
            path,
            cert_pem,
            key_pem,
            names.iter().map(|s| s.to_string()).collect(),
            Some("le".to_string()),
        ));
        store
    }

    #[test]
    fn lookup_returns_seeded_entries() {
        let store = seeded_store("/etc/www.pem", &["www.example.com"]);
        let entry = store.lookup("/etc/www.pem").unwrap();
        assert_eq!(entry.names, vec!["www.example.com"]);
        assert_eq!(entry.acme.as_deref(), Some("le"));
        assert!(store.lookup("/etc/other.pem").is_none());
    }

    #[test]
    fn duplicate_drops_bindings_but_keeps_metadata() {
        let store = seeded_store("/etc/www.pem", &["www.example.com"]);
        store.bind("/etc/www.pem", "https-main").unwrap();

        let live = store.lookup("/etc/www.pem").unwrap();
        assert_eq!(live.bindings().len(), 1);

        let duplicate = live.duplicate();
        assert!(duplicate.bindings().is_empty());
        assert_eq!(duplicate.path, live.path);
        assert_eq!(duplicate.names, live.names);
    }

    #[test]
    fn install_rebuilds_bindings_and_replaces_the_entry() {
        let store = seeded_store("/etc/www.pem", &["www.example.com"]);
        let slot = store.bind("/etc/www.pem", "https-main").unwrap();
        let before = slot.read().clone();

        let (new_cert, new_key) = self_signed(&["www.example.com"]);
        let mut target = store.lookup("/etc/www.pem").unwrap().duplicate();
        target.install_chain(new_cert.clone());
        target.key_pem = new_key;

        store.install(target).unwrap();

        // Binding now serves the new certificate
        let after = slot.read().clone();
        assert!(!Arc::ptr_eq(&before, &after));

        // Index entry carries the new chain and the rebuilt binding
        let live = store.lookup("/etc/www.pem").unwrap();
        assert_eq!(live.cert_pem, new_cert);
        assert_eq!(live.bindings().len(), 1);
        assert_eq!(live.bindings()[0].listener, "https-main");
    }

    #[test]
    fn install_fails_for_unknown_paths() {
        let store = seeded_store("/etc/www.pem", &["www.example.com"]);
        let (cert, key) = self_signed(&["other.example.com"]);
        let target = StoreEntry::new("/etc/other.pem", cert, key, vec![], None);

        let err = store.install(target).unwrap_err();
        assert!(matches!(err, StoreError::UnknownCertificate(path) if path == "/etc/other.pem"));
    }

    #[test]
    fn install_aborts_when_rebuild_fails_and_keeps_the_live_entry() {
        let store = seeded_store("/etc/www.pem", &["www.example.com"]);
        let slot = store.bind("/etc/www.pem", "https-main").unwrap();
        let before = slot.read().clone();
        let live_pem = store.lookup("/etc/www.pem").unwrap().cert_pem;

        let mut target = store.lookup("/etc/www.pem").unwrap().duplicate();
        target.install_chain("garbage, not pem");

        let err = store.install(target).unwrap_err();
        assert!(matches!(err, StoreError::BindingRebuild { .. }));

        // Nothing was published
        assert!(Arc::ptr_eq(&before, &*slot.read()));
        assert_eq!(store.lookup("/etc/www.pem").unwrap().cert_pem, live_pem);
    }

    #[test]
    fn try_lock_surfaces_contention() {
        let store = seeded_store("/etc/www.pem", &["www.example.com"]);
        let (cert, key) = self_signed(&["www.example.com"]);
        let mut target = store.lookup("/etc/www.pem").unwrap().duplicate();
        target.install_chain(cert);
        target.key_pem = key;

        let result = store.with_locked(|_| {
            // A second writer while the store is held must be rejected
            match store.install(target.clone()) {
                Err(StoreError::Locked) => Ok(()),
                other => panic!("expected Locked, got {other:?}"),
            }
        });
        assert!(result.is_ok());
    }

    #[test]
    fn expiry_and_san_parse_from_the_pem() {
        let (cert_pem, key_pem) = self_signed(&["a.example", "b.example"]);
        let entry = StoreEntry::new(
            "/etc/a.pem",
            cert_pem.clone(),
            key_pem,
            vec![],
            None,
        );

        let not_after = entry.not_after().unwrap();
        assert!(not_after > Utc::now());

        let names = subject_alt_names(&cert_pem).unwrap();
        assert_eq!(names, vec!["a.example", "b.example"]);
    }

    #[test]
    fn certified_key_requires_matching_pem_material() {
        let (cert_pem, key_pem) = self_signed(&["www.example.com"]);
        let entry = StoreEntry::new("/etc/www.pem", cert_pem, key_pem, vec![], None);
        assert!(entry.certified_key().is_ok());

        let broken = StoreEntry::new("/etc/www.pem", "nope", "nope", vec![], None);
        assert!(matches!(
            broken.certified_key().unwrap_err(),
            StoreError::Load { .. }
        ));
    }
}
