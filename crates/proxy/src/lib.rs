//! Rampart Proxy Library
//!
//! Core components of the Rampart reverse proxy that this crate owns:
//!
//! - **Certificate store**: entries indexed by path, each carrying its TLS
//!   bindings, with an atomic hot-swap path for certificate replacement
//! - **ACME renewal**: an embedded RFC 8555 client that renews store
//!   certificates in the background and installs them without a restart
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rampart_proxy::acme::{renew_certificate, AcmeRegistry, ChallengeBoard, HttpTransport};
//! use rampart_proxy::store::CertStore;
//!
//! let registry = AcmeRegistry::from_config(&config)?;
//! let store = Arc::new(CertStore::new());
//! let handle = renew_certificate(
//!     "/etc/rampart/certs/www.pem",
//!     &registry,
//!     &store,
//!     Arc::new(HttpTransport::new()?),
//!     Arc::new(ChallengeBoard::new()),
//! )?;
//! ```

pub mod acme;
pub mod store;

pub use store::{CertSlot, CertStore, StoreEntry, StoreError, TlsBinding};
