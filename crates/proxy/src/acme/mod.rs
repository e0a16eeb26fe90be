//! Embedded ACMEv2 (RFC 8555) certificate renewal
//!
//! Renews store certificates against an ACME directory without restarting
//! the proxy and without blocking its serving threads. One renewal is one
//! task; it signs every request itself and installs the result through the
//! store's hot-swap path.
//!
//! # Architecture
//!
//! - [`AcmeRegistry`] - per-section identities: account key, thumbprint,
//!   challenge type, leaf-key policy
//! - [`jws`] - flattened JWS signing, JWK thumbprints, key authorizations
//! - [`csr`] - leaf key generation and PKCS#10 CSR construction
//! - [`AcmeTransport`] / [`HttpTransport`] - one request per protocol step
//! - [`RenewalContext`] / [`drive`] - the order state machine
//! - [`ChallengePublisher`] / [`ChallengeBoard`] - where challenge
//!   responses get published; the serving mechanism lives elsewhere
//! - [`renew_certificate`] - the `acme renew <certname>` entry point
//!
//! # Renewal flow
//!
//! 1. The trigger duplicates the live store entry under the store lock,
//!    generates a fresh leaf key and builds the CSR
//! 2. The state machine fetches the directory and a first nonce, then
//!    resolves the account (`onlyReturnExisting` first, creation only when
//!    the server does not know the key)
//! 3. newOrder, then per authorization: fetch, select the configured
//!    challenge type, publish the key authorization, signal readiness,
//!    poll until the challenge settles
//! 4. finalize with the CSR, poll the order, download the PEM chain
//! 5. The hot-swap installer rebuilds every TLS binding of the live entry
//!    and atomically replaces it

mod challenge;
pub mod csr;
mod driver;
mod error;
mod http;
pub mod jws;
mod order;
mod registry;
mod trigger;

pub use challenge::{ChallengeBoard, ChallengePublisher};
pub use driver::{drive, AcmeState, Progress, PublishAction, RenewalContext, ACME_RETRY};
pub use error::{AcmeError, ServerProblem};
pub use http::{AcmeTransport, HttpTransport, StepMethod, StepRequest, StepResponse};
pub use registry::{AcmeIdentity, AcmeRegistry};
pub use trigger::{renew_certificate, TriggerError};
