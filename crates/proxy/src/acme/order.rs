//! RFC 8555 wire objects and payload builders
//!
//! Serde mirrors of the directory, order, authorization and challenge
//! resources, plus the request payloads the state machine POSTs. URLs are
//! carried as opaque strings, never normalized.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;

use super::error::{AcmeError, ServerProblem};
use super::jws::b64url;

/// The directory resource: the three endpoints a renewal needs
#[derive(Debug, Clone, Deserialize)]
pub struct Directory {
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    #[serde(rename = "newAccount")]
    pub new_account: String,
    #[serde(rename = "newOrder")]
    pub new_order: String,
}

/// An order identifier; only `dns` identifiers are produced here
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// An order resource, as returned by newOrder and the order poll
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBody {
    pub status: String,
    #[serde(default)]
    pub authorizations: Vec<String>,
    pub finalize: Option<String>,
    pub certificate: Option<String>,
    /// Problem document attached when the order went sideways
    #[serde(default)]
    pub error: Option<ServerProblem>,
}

/// An authorization resource
#[derive(Debug, Clone, Deserialize)]
pub struct AuthzBody {
    pub status: String,
    pub identifier: Identifier,
    #[serde(default)]
    pub challenges: Vec<ChallengeBody>,
}

/// One challenge inside an authorization
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub token: Option<String>,
    pub status: Option<String>,
}

/// Challenge poll result
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeStatus {
    pub status: String,
    /// Problem document attached when validation failed
    #[serde(default)]
    pub error: Option<ServerProblem>,
}

/// Parse a JSON response body, labeling failures with the current step
pub fn parse_json<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T, AcmeError> {
    serde_json::from_slice(body).map_err(|e| AcmeError::Malformed {
        what: what.to_string(),
        message: e.to_string(),
    })
}

/// Payload of the account-existence probe
pub fn check_account_payload() -> String {
    json!({ "onlyReturnExisting": true }).to_string()
}

/// Payload of the account creation POST
///
/// The configured contact is an address; the `mailto:` scheme is added
/// when it is not already there.
pub fn new_account_payload(contact: &str) -> String {
    let contact = if contact.starts_with("mailto:") {
        contact.to_string()
    } else {
        format!("mailto:{contact}")
    };
    json!({
        "termsOfServiceAgreed": true,
        "contact": [contact],
    })
    .to_string()
}

/// Payload of the newOrder POST: one `dns` identifier per name
pub fn new_order_payload(names: &[String]) -> String {
    let identifiers: Vec<Identifier> = names
        .iter()
        .map(|name| Identifier {
            kind: "dns".to_string(),
            value: name.clone(),
        })
        .collect();
    json!({ "identifiers": identifiers }).to_string()
}

/// Payload of the finalize POST: the CSR in base64url DER
pub fn finalize_payload(csr_der: &[u8]) -> String {
    json!({ "csr": b64url(csr_der) }).to_string()
}

/// Pick the first offered challenge whose type matches the configured one
///
/// The comparison is case-insensitive; servers spell the types lowercase.
pub fn select_challenge<'a>(
    challenges: &'a [ChallengeBody],
    wanted: &str,
) -> Option<&'a ChallengeBody> {
    challenges
        .iter()
        .find(|c| c.kind.eq_ignore_ascii_case(wanted))
}
