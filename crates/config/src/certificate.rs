//! `certificate` store declarations
//!
//! Each declaration seeds one certificate store entry at startup. The path
//! is the store key; the optional `acme` child binds the entry to an
//! `acme` section so it can be renewed at runtime.

use serde::{Deserialize, Serialize};

/// One `certificate "<path>"` declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDecl {
    /// Path of the PEM file holding the leaf certificate and chain
    ///
    /// The key file is expected next to it with a `.key` suffix unless
    /// `key-file` says otherwise.
    pub path: String,
    /// Explicit key file path
    pub key_file: Option<String>,
    /// Name of the `acme` section responsible for renewing this entry
    pub acme: Option<String>,
    /// DNS names this certificate covers
    ///
    /// When empty, the names are read from the certificate's
    /// subjectAltName extension at load time.
    pub domains: Vec<String>,
}

impl CertificateDecl {
    /// Resolve the key file path, defaulting to `<path>.key`
    pub fn key_path(&self) -> String {
        match &self.key_file {
            Some(path) => path.clone(),
            None => format!("{}.key", self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_path_defaults_alongside_certificate() {
        let decl = CertificateDecl {
            path: "/etc/rampart/www.pem".to_string(),
            key_file: None,
            acme: None,
            domains: vec![],
        };
        assert_eq!(decl.key_path(), "/etc/rampart/www.pem.key");

        let explicit = CertificateDecl {
            key_file: Some("/etc/keys/www.key".to_string()),
            ..decl
        };
        assert_eq!(explicit.key_path(), "/etc/keys/www.key");
    }
}
