//! ACME identity registry
//!
//! Builds one [`AcmeIdentity`] per configured `acme` section at startup:
//! the account key is read from disk, parsed, checked against the JWS
//! algorithm table and thumbprinted. The registry is immutable afterwards;
//! renewal tasks hold `Arc` references into it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use openssl::pkey::{PKey, Private};
use tracing::info;

use rampart_config::{AcmeSection, ChallengeKind, Config, KeyPolicy};

use super::error::AcmeError;
use super::jws;

/// One fully initialized ACME identity
#[derive(Debug)]
pub struct AcmeIdentity {
    /// Section name, the store binding key
    pub name: String,
    /// ACME directory URL
    pub directory: String,
    /// Contact address for account creation
    pub contact: Option<String>,
    /// Where the account key was loaded from
    pub account_file: PathBuf,
    /// The account private key
    pub key: PKey<Private>,
    /// RFC 7638 thumbprint of the account key
    pub thumbprint: String,
    /// Challenge type this identity answers
    pub challenge: ChallengeKind,
    /// Leaf key generation policy
    pub key_policy: KeyPolicy,
}

impl AcmeIdentity {
    /// Load the account key for a section and derive the identity
    ///
    /// The key file must already exist: startup aborts otherwise.
    // TODO: generate the account key and persist it when the file is absent
    fn load(section: &AcmeSection) -> Result<Self, AcmeError> {
        let path = section.account_file();
        let path_display = path.display().to_string();

        let pem = std::fs::read(&path).map_err(|_| AcmeError::AccountKey {
            path: path_display.clone(),
            message: "is not present and can't be generated, please provide an account file"
                .to_string(),
        })?;

        let key = PKey::private_key_from_pem(&pem).map_err(|_| AcmeError::AccountKey {
            path: path_display.clone(),
            message: "is present but cannot be read or parsed".to_string(),
        })?;

        // Fails now, not mid-renewal, for key types JWS cannot sign with
        let thumbprint = jws::thumbprint(&key)?;

        info!(
            section = %section.name,
            account = %path_display,
            challenge = %section.challenge,
            "Loaded ACME account key"
        );

        Ok(AcmeIdentity {
            name: section.name.clone(),
            directory: section.directory.clone(),
            contact: section.contact.clone(),
            account_file: path,
            key,
            thumbprint,
            challenge: section.challenge,
            key_policy: section.key,
        })
    }
}

/// All configured ACME identities, keyed by section name
///
/// Populated at config load, read-only thereafter.
#[derive(Debug, Default)]
pub struct AcmeRegistry {
    identities: HashMap<String, Arc<AcmeIdentity>>,
}

impl AcmeRegistry {
    /// Initialize every configured identity; any failure is fatal
    pub fn from_config(config: &Config) -> Result<Self, AcmeError> {
        let mut identities = HashMap::new();
        for section in &config.acme {
            let identity = AcmeIdentity::load(section)?;
            identities.insert(section.name.clone(), Arc::new(identity));
        }
        Ok(AcmeRegistry { identities })
    }

    /// Look up an identity by section name
    pub fn get(&self, name: &str) -> Option<Arc<AcmeIdentity>> {
        self.identities.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}
