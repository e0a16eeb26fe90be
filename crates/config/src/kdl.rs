//! KDL configuration parsing
//!
//! Turns a [`kdl::KdlDocument`] into a [`Config`]. Structural problems
//! (missing arguments, repeated keys, unknown keywords) are reported here;
//! cross-section checks live in [`Config::validate`].

use std::collections::HashSet;
use std::path::PathBuf;

use kdl::{KdlDocument, KdlNode};

use crate::acme::{AcmeSection, ChallengeKind, Curve, KeyPolicy, DEFAULT_RSA_BITS};
use crate::certificate::CertificateDecl;
use crate::{Config, ConfigError};

/// Parse a KDL document into an unvalidated [`Config`]
pub(crate) fn parse(content: &str) -> Result<Config, ConfigError> {
    let doc: KdlDocument = content
        .parse()
        .map_err(|e: kdl::KdlError| ConfigError::Syntax(e.to_string()))?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "expose-experimental-directives" => config.experimental_directives = true,
            "acme" => config.acme.push(parse_acme_section(node)?),
            "certificate" => config.certificates.push(parse_certificate(node)?),
            other => {
                return Err(ConfigError::UnknownNode {
                    name: other.to_string(),
                })
            }
        }
    }

    Ok(config)
}

/// First argument of a node, as a string
fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// First argument of a node, as an integer
fn first_int_arg(node: &KdlNode) -> Option<i128> {
    node.entries().first().and_then(|e| e.value().as_integer())
}

/// All string arguments of a node
fn string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn require_string_arg(node: &KdlNode) -> Result<String, ConfigError> {
    first_string_arg(node).ok_or_else(|| ConfigError::MissingArgument {
        node: node.name().value().to_string(),
    })
}

/// Parse one `acme "<name>" { ... }` section
fn parse_acme_section(node: &KdlNode) -> Result<AcmeSection, ConfigError> {
    let name = require_string_arg(node)?;

    let mut directory: Option<String> = None;
    let mut contact: Option<String> = None;
    let mut account: Option<PathBuf> = None;
    let mut challenge: Option<ChallengeKind> = None;
    let mut keytype: Option<String> = None;
    let mut bits: Option<i128> = None;
    let mut curves: Option<String> = None;

    let mut seen: HashSet<String> = HashSet::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value();
            if !seen.insert(key.to_string()) {
                return Err(ConfigError::DuplicateKey {
                    section: name.clone(),
                    key: key.to_string(),
                });
            }

            match key {
                "directory" => directory = Some(require_string_arg(child)?),
                "contact" => contact = Some(require_string_arg(child)?),
                "account" => account = Some(PathBuf::from(require_string_arg(child)?)),
                "challenge" => {
                    let value = require_string_arg(child)?;
                    challenge = Some(ChallengeKind::from_config(&value).ok_or_else(|| {
                        ConfigError::InvalidValue {
                            section: name.clone(),
                            key: "challenge".to_string(),
                            message: format!("'{value}' is not a challenge type: HTTP-01 or DNS-01"),
                        }
                    })?);
                }
                "keytype" => keytype = Some(require_string_arg(child)?),
                "bits" => {
                    bits = Some(first_int_arg(child).ok_or_else(|| {
                        ConfigError::MissingArgument {
                            node: "bits".to_string(),
                        }
                    })?)
                }
                "curves" => curves = Some(require_string_arg(child)?),
                other => {
                    return Err(ConfigError::UnknownKey {
                        section: name.clone(),
                        key: other.to_string(),
                    })
                }
            }
        }
    }

    let directory = directory.ok_or_else(|| ConfigError::MissingKey {
        section: name.clone(),
        key: "directory".to_string(),
    })?;

    let key = parse_key_policy(&name, keytype.as_deref(), bits, curves.as_deref())?;

    Ok(AcmeSection {
        name,
        directory,
        contact,
        account,
        challenge: challenge.unwrap_or_default(),
        key,
    })
}

/// Combine `keytype`, `bits` and `curves` into a [`KeyPolicy`]
fn parse_key_policy(
    section: &str,
    keytype: Option<&str>,
    bits: Option<i128>,
    curves: Option<&str>,
) -> Result<KeyPolicy, ConfigError> {
    match keytype.unwrap_or("ECDSA") {
        "RSA" => {
            if curves.is_some() {
                return Err(ConfigError::InvalidValue {
                    section: section.to_string(),
                    key: "curves".to_string(),
                    message: "only relevant with keytype ECDSA".to_string(),
                });
            }
            let bits = match bits {
                None => DEFAULT_RSA_BITS,
                Some(b) if (2048..=8192).contains(&b) => b as u32,
                Some(b) => {
                    return Err(ConfigError::InvalidValue {
                        section: section.to_string(),
                        key: "bits".to_string(),
                        message: format!("{b} is outside the accepted 2048-8192 range"),
                    })
                }
            };
            Ok(KeyPolicy::Rsa { bits })
        }
        "ECDSA" => {
            if bits.is_some() {
                return Err(ConfigError::InvalidValue {
                    section: section.to_string(),
                    key: "bits".to_string(),
                    message: "only relevant with keytype RSA".to_string(),
                });
            }
            let curve = match curves {
                None => Curve::P384,
                Some(name) => Curve::from_name(name).ok_or_else(|| ConfigError::InvalidValue {
                    section: section.to_string(),
                    key: "curves".to_string(),
                    message: format!("unknown curve '{name}'"),
                })?,
            };
            Ok(KeyPolicy::Ecdsa { curve })
        }
        other => Err(ConfigError::InvalidValue {
            section: section.to_string(),
            key: "keytype".to_string(),
            message: format!("'{other}' is not a key type: RSA or ECDSA"),
        }),
    }
}

/// Parse one `certificate "<path>" { ... }` declaration
fn parse_certificate(node: &KdlNode) -> Result<CertificateDecl, ConfigError> {
    let path = require_string_arg(node)?;

    let mut key_file: Option<String> = None;
    let mut acme: Option<String> = None;
    let mut domains: Vec<String> = Vec::new();

    let mut seen: HashSet<String> = HashSet::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value();
            if !seen.insert(key.to_string()) {
                return Err(ConfigError::DuplicateKey {
                    section: format!("certificate '{path}'"),
                    key: key.to_string(),
                });
            }

            match key {
                "key-file" => key_file = Some(require_string_arg(child)?),
                "acme" => acme = Some(require_string_arg(child)?),
                "domains" => {
                    domains = string_args(child);
                    if domains.is_empty() {
                        return Err(ConfigError::MissingArgument {
                            node: "domains".to_string(),
                        });
                    }
                }
                other => {
                    return Err(ConfigError::UnknownKey {
                        section: format!("certificate '{path}'"),
                        key: other.to_string(),
                    })
                }
            }
        }
    }

    Ok(CertificateDecl {
        path,
        key_file,
        acme,
        domains,
    })
}
