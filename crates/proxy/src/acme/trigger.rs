//! Renewal trigger
//!
//! Entry point behind `acme renew <certname>`. Everything up to the task
//! spawn is synchronous and reports straight back to the caller: the store
//! lookup and duplication run under the store-wide try-lock, then the leaf
//! key and CSR are produced. Only a fully provisioned context is handed to
//! the state-machine task.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use super::challenge::ChallengePublisher;
use super::csr;
use super::driver::{self, RenewalContext, ACME_RETRY};
use super::error::AcmeError;
use super::http::AcmeTransport;
use super::registry::AcmeRegistry;
use crate::store::{CertStore, StoreError};

/// Renewal-setup failures, surfaced synchronously to the CLI caller
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Store busy or certificate unknown
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The entry exists but no `acme` section is responsible for it
    #[error("certificate '{0}' is not bound to any acme section")]
    NotBound(String),

    /// The entry names an `acme` section the registry does not know
    ///
    /// Config validation rejects this at startup; the check guards
    /// store entries seeded through other paths.
    #[error("certificate '{path}' references unknown acme section '{name}'")]
    UnknownSection { path: String, name: String },

    /// Key generation or CSR construction failed
    #[error(transparent)]
    Acme(#[from] AcmeError),
}

/// Validate the request, provision a renewal context and spawn its task
///
/// On success the state machine runs detached; the returned handle
/// resolves to the task's outcome. Any failure here frees everything that
/// was provisioned and nothing is spawned.
pub fn renew_certificate(
    certname: &str,
    registry: &AcmeRegistry,
    store: &Arc<CertStore>,
    transport: Arc<dyn AcmeTransport>,
    publisher: Arc<dyn ChallengePublisher>,
) -> Result<JoinHandle<Result<(), AcmeError>>, TriggerError> {
    // Look up and duplicate the live entry under the store try-lock
    let (mut target, acme_name) = store.with_locked(|index| {
        let entry = index
            .get(certname)
            .ok_or_else(|| StoreError::UnknownCertificate(certname.to_string()))?;
        Ok((entry.duplicate(), entry.acme.clone()))
    })?;

    let acme_name = acme_name.ok_or_else(|| TriggerError::NotBound(certname.to_string()))?;
    let cfg = registry
        .get(&acme_name)
        .ok_or_else(|| TriggerError::UnknownSection {
            path: certname.to_string(),
            name: acme_name.clone(),
        })?;

    // Fresh leaf key per the section's policy, then the CSR over the
    // duplicate's DNS names
    let leaf_key = csr::generate_leaf_key(&cfg.key_policy)?;
    target.install_leaf_key(&leaf_key)?;
    let csr_der = csr::build_csr(&leaf_key, &target.names)?;

    let ctx = RenewalContext::new(cfg.clone(), store.clone(), target, leaf_key, csr_der);

    info!(
        cert = %certname,
        acme = %acme_name,
        retries = ACME_RETRY,
        "Renewal task spawned"
    );
    Ok(tokio::spawn(driver::drive(ctx, transport, publisher)))
}
