//! Configuration module for the Rampart proxy
//!
//! Parses the KDL configuration file into plain structures and validates
//! them before anything else starts. Validation failures are fatal: a
//! configuration that references a non-existent `acme` section, repeats a
//! key, or uses an unknown keyword never reaches the runtime.
//!
//! # Module Organization
//!
//! - [`acme`]: `acme` section configuration (directory, account, key policy)
//! - [`certificate`]: `certificate` store declarations
//! - [`kdl`]: KDL format parsing
//!
//! # Example
//!
//! ```kdl
//! expose-experimental-directives
//!
//! acme "le" {
//!     directory "https://acme-v02.api.letsencrypt.org/directory"
//!     contact "admin@example.com"
//!     challenge "HTTP-01"
//!     keytype "ECDSA"
//!     curves "P-384"
//! }
//!
//! certificate "/etc/rampart/certs/www.pem" {
//!     acme "le"
//!     domains "www.example.com" "example.com"
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod acme;
pub mod certificate;
mod kdl;

pub use acme::{AcmeSection, ChallengeKind, Curve, KeyPolicy};
pub use certificate::CertificateDecl;

/// Errors raised while loading or validating the configuration
///
/// Every variant is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// KDL syntax error
    #[error("KDL parse error: {0}")]
    Syntax(String),

    /// A section or node is missing its argument
    #[error("'{node}' requires an argument")]
    MissingArgument { node: String },

    /// Two sections share the same name
    #[error("acme section '{name}' already exists")]
    DuplicateSection { name: String },

    /// A key appeared twice in one section
    #[error("keyword '{key}' appears more than once in acme section '{section}'")]
    DuplicateKey { section: String, key: String },

    /// Unknown keyword inside a section
    #[error("unknown keyword '{key}' in {section} section")]
    UnknownKey { section: String, key: String },

    /// Unknown top-level node
    #[error("unknown configuration node '{name}'")]
    UnknownNode { name: String },

    /// Required key missing from a section
    #[error("acme section '{section}' is missing the required '{key}' keyword")]
    MissingKey { section: String, key: String },

    /// Value failed validation
    #[error("invalid value for '{key}' in acme section '{section}': {message}")]
    InvalidValue {
        section: String,
        key: String,
        message: String,
    },

    /// The `acme` section is experimental and needs the global opt-in
    #[error(
        "acme section '{name}' is experimental; add 'expose-experimental-directives' to use it"
    )]
    ExperimentalNotEnabled { name: String },

    /// A certificate references an acme section that does not exist
    #[error("certificate '{path}' references unknown acme section '{name}'")]
    DanglingAcmeRef { path: String, name: String },

    /// Two certificate declarations share the same path
    #[error("certificate '{path}' is declared more than once")]
    DuplicateCertificate { path: String },
}

/// Top-level Rampart configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Whether experimental directives (the `acme` sections) are allowed
    pub experimental_directives: bool,
    /// Parsed `acme` sections, in declaration order
    pub acme: Vec<AcmeSection>,
    /// Certificate store declarations
    pub certificates: Vec<CertificateDecl>,
}

impl Config {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        debug!(path = %path.display(), "Loading configuration");
        Self::from_str(&content)
    }

    /// Parse and validate configuration from a KDL string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config = kdl::parse(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up an `acme` section by name
    pub fn acme_section(&self, name: &str) -> Option<&AcmeSection> {
        self.acme.iter().find(|s| s.name == name)
    }

    /// Cross-field validation
    ///
    /// Checks the invariants the parser alone cannot see: section name
    /// uniqueness, the experimental opt-in, and that every certificate's
    /// `acme` reference resolves.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.acme.is_empty() && !self.experimental_directives {
            return Err(ConfigError::ExperimentalNotEnabled {
                name: self.acme[0].name.clone(),
            });
        }

        let mut names = HashSet::new();
        for section in &self.acme {
            if !names.insert(section.name.as_str()) {
                return Err(ConfigError::DuplicateSection {
                    name: section.name.clone(),
                });
            }
        }

        let mut paths = HashSet::new();
        for cert in &self.certificates {
            if !paths.insert(cert.path.as_str()) {
                return Err(ConfigError::DuplicateCertificate {
                    path: cert.path.clone(),
                });
            }
            if let Some(acme_name) = &cert.acme {
                if !names.contains(acme_name.as_str()) {
                    return Err(ConfigError::DanglingAcmeRef {
                        path: cert.path.clone(),
                        name: acme_name.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
