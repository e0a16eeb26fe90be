//! ACME error types
//!
//! The taxonomy follows what the operator can act on: configuration and
//! account-key problems are fatal at startup, renewal-setup problems are
//! surfaced synchronously to the CLI, protocol problems consume the retry
//! budget of the running task. Whenever the server returned a problem
//! document (RFC 8555 §6.7), its `type` and `detail` fields ride along in
//! the message.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

use crate::store::StoreError;

/// Prefix of every ACME urn error type
const ACME_ERROR_URN: &str = "urn:ietf:params:acme:error:";

/// An RFC 8555 problem document, reduced to the fields we surface
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ServerProblem {
    /// The `type` urn, e.g. `urn:ietf:params:acme:error:badNonce`
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Human-readable `detail`
    pub detail: Option<String>,
}

impl ServerProblem {
    /// Parse a problem document from an error response body
    ///
    /// Bodies that are not JSON problem documents yield an empty problem;
    /// the HTTP status alone is then reported.
    pub fn from_body(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }

    /// Whether the `type` urn names the given ACME error, e.g. `badNonce`
    pub fn is(&self, name: &str) -> bool {
        self.kind
            .as_deref()
            .and_then(|k| k.strip_prefix(ACME_ERROR_URN))
            .is_some_and(|k| k == name)
    }
}

impl fmt::Display for ServerProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.detail.as_deref(), self.kind.as_deref()) {
            (Some(detail), Some(kind)) => write!(f, ": '{detail}' ({kind})"),
            (Some(detail), None) => write!(f, ": '{detail}'"),
            (None, Some(kind)) => write!(f, ": ({kind})"),
            (None, None) => Ok(()),
        }
    }
}

/// Errors that can occur during ACME operations
#[derive(Debug, Error)]
pub enum AcmeError {
    /// HTTP client setup or transport failure
    #[error("HTTP client error: {0}")]
    Transport(String),

    /// The server answered with a non-2xx status
    #[error("invalid HTTP status code {status} when {what}{problem}")]
    Status {
        status: u16,
        what: String,
        problem: ServerProblem,
    },

    /// A polled resource is not settled yet; retried against the budget
    #[error("{what} is still {status}")]
    StillPending { what: &'static str, status: String },

    /// A resource ended up in a state the renewal cannot recover from
    #[error("{what} status is '{status}'{problem}")]
    BadStatus {
        what: &'static str,
        status: String,
        problem: ServerProblem,
    },

    /// No nonce available for signing a request
    #[error("no nonce available when {0}")]
    MissingNonce(String),

    /// A required response header was absent
    #[error("no '{header}' header when {what}")]
    MissingHeader {
        what: String,
        header: &'static str,
    },

    /// A required JSON field was absent
    #[error("no '{field}' field when {what}")]
    MissingField {
        what: String,
        field: &'static str,
    },

    /// Response body could not be parsed
    #[error("malformed response when {what}: {message}")]
    Malformed { what: String, message: String },

    /// The account key type maps to no JWS algorithm
    #[error("couldn't choose a JWK algorithm")]
    Algorithm,

    /// JWS construction failed
    #[error("JWS signature failure: {0}")]
    Signing(String),

    /// Leaf key generation failed
    #[error("couldn't generate a private key: {0}")]
    KeyGeneration(String),

    /// CSR construction failed
    #[error("cannot generate the CSR: {0}")]
    Csr(String),

    /// None of the offered challenges matches the configured type
    #[error("no '{wanted}' challenge offered for '{domain}'")]
    ChallengeNotOffered { wanted: String, domain: String },

    /// The account contact is needed but was not configured
    #[error("acme section '{section}' has no contact but the account must be created")]
    MissingContact { section: String },

    /// Account key file problem, fatal at startup
    #[error("account key '{path}': {message}")]
    AccountKey { path: String, message: String },

    /// Store interaction failed during installation
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AcmeError {
    /// Build a [`AcmeError::Status`] from a response body
    pub fn status(status: u16, what: impl Into<String>, body: &[u8]) -> Self {
        AcmeError::Status {
            status,
            what: what.into(),
            problem: ServerProblem::from_body(body),
        }
    }

    /// The problem document attached to this error, if any
    pub fn problem(&self) -> Option<&ServerProblem> {
        match self {
            AcmeError::Status { problem, .. } | AcmeError::BadStatus { problem, .. } => {
                Some(problem)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_carries_detail_and_type() {
        let body = br#"{"type":"urn:ietf:params:acme:error:badNonce","detail":"bad nonce"}"#;
        let err = AcmeError::status(400, "getting newOrder URL", body);
        assert_eq!(
            err.to_string(),
            "invalid HTTP status code 400 when getting newOrder URL: \
             'bad nonce' (urn:ietf:params:acme:error:badNonce)"
        );
        assert!(err.problem().unwrap().is("badNonce"));
    }

    #[test]
    fn status_error_without_problem_body() {
        let err = AcmeError::status(503, "getting the directory", b"Service Unavailable");
        assert_eq!(
            err.to_string(),
            "invalid HTTP status code 503 when getting the directory"
        );
    }

    #[test]
    fn problem_type_matching_requires_the_acme_urn() {
        let problem = ServerProblem {
            kind: Some("urn:example:badNonce".to_string()),
            detail: None,
        };
        assert!(!problem.is("badNonce"));

        let problem = ServerProblem {
            kind: Some("urn:ietf:params:acme:error:accountDoesNotExist".to_string()),
            detail: None,
        };
        assert!(problem.is("accountDoesNotExist"));
    }
}
