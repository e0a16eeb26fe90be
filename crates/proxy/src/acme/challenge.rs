//! Challenge response publication contract
//!
//! The renewal proves control of a name by publishing a key authorization:
//! over HTTP-01 it must be served at
//! `/.well-known/acme-challenge/<token>`, over DNS-01 its SHA-256 digest
//! must appear as a TXT record at `_acme-challenge.<domain>`. The
//! publication *mechanism* lives outside this crate; the state machine only
//! talks to this trait, handing it the material as authorizations are
//! parsed and asking for cleanup when the renewal ends.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::error::AcmeError;

/// Where challenge responses get published
#[async_trait]
pub trait ChallengePublisher: Send + Sync {
    /// Make `key_authorization` retrievable under the HTTP-01 token path
    async fn publish_http01(&self, token: &str, key_authorization: &str)
        -> Result<(), AcmeError>;

    /// Make `record_value` visible as the `_acme-challenge` TXT record
    async fn publish_dns01(&self, domain: &str, record_value: &str) -> Result<(), AcmeError>;

    /// Drop everything published for this renewal
    async fn cleanup(&self);
}

/// In-memory challenge board
///
/// Holds pending responses for whatever front end answers the validation
/// requests: the HTTP listener looks tokens up by path, a DNS shim looks
/// record values up by domain.
#[derive(Debug, Default)]
pub struct ChallengeBoard {
    http: Mutex<HashMap<String, String>>,
    dns: Mutex<HashMap<String, String>>,
}

impl ChallengeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Response body for `/.well-known/acme-challenge/<token>`
    pub fn http01_response(&self, token: &str) -> Option<String> {
        self.http.lock().get(token).cloned()
    }

    /// TXT value for `_acme-challenge.<domain>`
    pub fn dns01_record(&self, domain: &str) -> Option<String> {
        self.dns.lock().get(domain).cloned()
    }

    /// Number of pending responses, both types
    pub fn pending(&self) -> usize {
        self.http.lock().len() + self.dns.lock().len()
    }
}

#[async_trait]
impl ChallengePublisher for ChallengeBoard {
    async fn publish_http01(
        &self,
        token: &str,
        key_authorization: &str,
    ) -> Result<(), AcmeError> {
        debug!(token = %token, "Publishing HTTP-01 challenge response");
        self.http
            .lock()
            .insert(token.to_string(), key_authorization.to_string());
        Ok(())
    }

    async fn publish_dns01(&self, domain: &str, record_value: &str) -> Result<(), AcmeError> {
        debug!(domain = %domain, "Publishing DNS-01 record value");
        self.dns
            .lock()
            .insert(domain.to_string(), record_value.to_string());
        Ok(())
    }

    async fn cleanup(&self) {
        let removed = self.pending();
        self.http.lock().clear();
        self.dns.lock().clear();
        if removed > 0 {
            debug!(removed, "Cleared pending challenge responses");
        }
    }
}
