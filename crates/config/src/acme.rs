//! `acme` section configuration
//!
//! One section describes one ACME identity: where the directory lives,
//! which account key signs requests, which challenge type the proxy can
//! answer, and what kind of leaf key to generate at renewal time.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default RSA modulus size when `keytype "RSA"` is given without `bits`
pub const DEFAULT_RSA_BITS: u32 = 4096;

/// One `acme <name>` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcmeSection {
    /// Section name, unique across the configuration
    pub name: String,
    /// ACME directory URL
    pub directory: String,
    /// Contact address; required only when a new account must be created
    pub contact: Option<String>,
    /// Path to the account private key file
    ///
    /// When unset, [`AcmeSection::account_file`] falls back to
    /// `<name>.account.key`.
    pub account: Option<PathBuf>,
    /// Challenge type the proxy will answer
    pub challenge: ChallengeKind,
    /// Leaf key generation policy
    pub key: KeyPolicy,
}

impl AcmeSection {
    /// Resolve the account key path, applying the `<name>.account.key` default
    pub fn account_file(&self) -> PathBuf {
        match &self.account {
            Some(path) => path.clone(),
            None => PathBuf::from(format!("{}.account.key", self.name)),
        }
    }
}

/// Challenge type for an ACME identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChallengeKind {
    /// HTTP-01: the server fetches `/.well-known/acme-challenge/<token>`
    #[default]
    Http01,
    /// DNS-01: the server queries a `_acme-challenge` TXT record
    Dns01,
}

impl ChallengeKind {
    /// The challenge type string as it appears in authorization objects
    pub fn wire(&self) -> &'static str {
        match self {
            ChallengeKind::Http01 => "http-01",
            ChallengeKind::Dns01 => "dns-01",
        }
    }

    /// Parse the configuration spelling (`HTTP-01` or `DNS-01`)
    pub fn from_config(value: &str) -> Option<Self> {
        match value {
            "HTTP-01" => Some(ChallengeKind::Http01),
            "DNS-01" => Some(ChallengeKind::Dns01),
            _ => None,
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeKind::Http01 => write!(f, "HTTP-01"),
            ChallengeKind::Dns01 => write!(f, "DNS-01"),
        }
    }
}

/// Leaf key generation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPolicy {
    /// RSA key with the given modulus size
    Rsa { bits: u32 },
    /// ECDSA key on the given named curve
    Ecdsa { curve: Curve },
}

impl Default for KeyPolicy {
    fn default() -> Self {
        KeyPolicy::Ecdsa {
            curve: Curve::P384,
        }
    }
}

/// Named elliptic curves usable for ACME keys
///
/// These are the three curves JOSE defines signature algorithms for
/// (RFC 7518 §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Curve {
    P256,
    P384,
    P521,
}

impl Curve {
    /// Parse a curve name, accepting both NIST and SECG spellings
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "P-256" | "secp256r1" | "prime256v1" => Some(Curve::P256),
            "P-384" | "secp384r1" => Some(Curve::P384),
            "P-521" | "secp521r1" => Some(Curve::P521),
            _ => None,
        }
    }

    /// NIST name, as used in JWK `crv` fields
    pub fn nist_name(&self) -> &'static str {
        match self {
            Curve::P256 => "P-256",
            Curve::P384 => "P-384",
            Curve::P521 => "P-521",
        }
    }

    /// Field size in bits
    pub fn bits(&self) -> u32 {
        match self {
            Curve::P256 => 256,
            Curve::P384 => 384,
            Curve::P521 => 521,
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.nist_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_file_defaults_to_section_name() {
        let section = AcmeSection {
            name: "le".to_string(),
            directory: "https://example.com/dir".to_string(),
            contact: None,
            account: None,
            challenge: ChallengeKind::default(),
            key: KeyPolicy::default(),
        };
        assert_eq!(section.account_file(), PathBuf::from("le.account.key"));
    }

    #[test]
    fn curve_accepts_secg_aliases() {
        assert_eq!(Curve::from_name("prime256v1"), Some(Curve::P256));
        assert_eq!(Curve::from_name("secp384r1"), Some(Curve::P384));
        assert_eq!(Curve::from_name("P-521"), Some(Curve::P521));
        assert_eq!(Curve::from_name("curve25519"), None);
    }

    #[test]
    fn challenge_kind_wire_names() {
        assert_eq!(ChallengeKind::Http01.wire(), "http-01");
        assert_eq!(ChallengeKind::Dns01.wire(), "dns-01");
        assert_eq!(ChallengeKind::from_config("HTTP-01"), Some(ChallengeKind::Http01));
        assert_eq!(ChallengeKind::from_config("http-01"), None);
    }
}
