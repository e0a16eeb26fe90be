//! The ACME order state machine
//!
//! One renewal is one task walking newOrder → authorizations → challenges →
//! challenge poll → finalize → order poll → download. The machine has two
//! axes: the protocol state, and the HTTP phase within it. In the request
//! phase [`RenewalContext::build_request`] produces the signed request for
//! the current state; the `.await` on the transport is the task's only
//! suspension point; in the response phase [`RenewalContext::on_response`]
//! harvests headers, classifies the status and advances. Both phase
//! functions are free of I/O, so the whole transition table can be driven
//! by tests without a network.
//!
//! Failures rewind to the request phase of the same state and consume the
//! retry budget; the budget refills when a state advances. Polling states
//! burn the same budget, there is no timer-based backoff.

use std::sync::Arc;

use openssl::pkey::{PKey, Private};
use tracing::{debug, error, info, warn};

use rampart_config::ChallengeKind;

use super::challenge::ChallengePublisher;
use super::error::AcmeError;
use super::http::{AcmeTransport, StepRequest, StepResponse, PEM_CHAIN};
use super::jws;
use super::order::{
    check_account_payload, finalize_payload, new_account_payload, new_order_payload, parse_json,
    select_challenge, AuthzBody, ChallengeStatus, Directory, OrderBody,
};
use super::registry::AcmeIdentity;
use crate::store::{CertStore, StoreEntry};

/// Retry budget per protocol step
pub const ACME_RETRY: u8 = 3;

/// Protocol states of a renewal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcmeState {
    Resources,
    NewNonce,
    CheckAccount,
    NewAccount,
    NewOrder,
    Auth,
    Challenge,
    CheckChallenge,
    Finalize,
    CheckOrder,
    Certificate,
    End,
}

impl AcmeState {
    /// Step label for error messages and logs
    fn what(&self) -> &'static str {
        match self {
            AcmeState::Resources => "getting the directory",
            AcmeState::NewNonce => "getting a new nonce",
            AcmeState::CheckAccount => "checking the account",
            AcmeState::NewAccount => "creating the account",
            AcmeState::NewOrder => "getting newOrder URL",
            AcmeState::Auth => "getting the authorization",
            AcmeState::Challenge => "starting the challenge",
            AcmeState::CheckChallenge => "checking the challenge",
            AcmeState::Finalize => "finalizing the order",
            AcmeState::CheckOrder => "checking the order",
            AcmeState::Certificate => "downloading the certificate",
            AcmeState::End => "done",
        }
    }
}

/// One authorization of the order
///
/// `auth_url` comes from the newOrder response; the challenge URL and
/// token are filled in while the AUTH phase walks the list.
#[derive(Debug, Clone)]
struct AuthPending {
    auth_url: String,
    chall_url: Option<String>,
    token: Option<String>,
}

/// What a consumed response asks the driver to do next
#[derive(Debug)]
pub enum Progress {
    /// Issue the request for the (possibly unchanged) current state
    Advanced,
    /// Publish a challenge response, then issue the next request
    PublishAndAdvance(PublishAction),
    /// The new certificate is installed; the task is done
    Finished,
}

/// Challenge material to hand to the publisher
#[derive(Debug, Clone)]
pub struct PublishAction {
    pub kind: ChallengeKind,
    /// The identifier under validation (DNS name, no wildcard prefix)
    pub identifier: String,
    pub token: String,
    pub key_authorization: String,
}

/// The in-flight renewal state
///
/// Owns the fresh leaf key, the CSR, the duplicated store entry and every
/// buffer the protocol accumulates. Dropped when the task ends.
pub struct RenewalContext {
    cfg: Arc<AcmeIdentity>,
    store: Arc<CertStore>,
    target: StoreEntry,
    #[allow(dead_code)]
    leaf_key: PKey<Private>,
    csr_der: Vec<u8>,
    directory: Option<Directory>,
    nonce: Option<String>,
    kid: Option<String>,
    order_url: Option<String>,
    finalize_url: Option<String>,
    certificate_url: Option<String>,
    auths: Vec<AuthPending>,
    next_auth: usize,
    state: AcmeState,
    retries: u8,
}

impl RenewalContext {
    /// Assemble the context for a freshly triggered renewal
    pub fn new(
        cfg: Arc<AcmeIdentity>,
        store: Arc<CertStore>,
        target: StoreEntry,
        leaf_key: PKey<Private>,
        csr_der: Vec<u8>,
    ) -> Self {
        RenewalContext {
            cfg,
            store,
            target,
            leaf_key,
            csr_der,
            directory: None,
            nonce: None,
            kid: None,
            order_url: None,
            finalize_url: None,
            certificate_url: None,
            auths: Vec::new(),
            next_auth: 0,
            state: AcmeState::Resources,
            retries: ACME_RETRY,
        }
    }

    /// The store path being renewed
    pub fn cert_path(&self) -> &str {
        &self.target.path
    }

    fn missing_field(&self, field: &'static str) -> AcmeError {
        AcmeError::MissingField {
            what: self.state.what().to_string(),
            field,
        }
    }

    fn missing_header(&self, header: &'static str) -> AcmeError {
        AcmeError::MissingHeader {
            what: self.state.what().to_string(),
            header,
        }
    }

    /// Sign a POST for the current state
    ///
    /// Uses the most recently harvested nonce, and `kid` as soon as the
    /// account URL is known (`jwk` before that).
    fn signed_post(&self, url: &str, payload: &str) -> Result<StepRequest, AcmeError> {
        let nonce = self
            .nonce
            .as_deref()
            .ok_or_else(|| AcmeError::MissingNonce(self.state.what().to_string()))?;
        let body = jws::sign_flattened(&self.cfg.key, self.kid.as_deref(), nonce, url, payload)?;
        Ok(StepRequest::post_jose(url, body))
    }

    fn current_auth(&self) -> Result<&AuthPending, AcmeError> {
        self.auths
            .get(self.next_auth)
            .ok_or_else(|| self.missing_field("authorization"))
    }

    /// Request phase: build the request for the current state
    pub fn build_request(&self) -> Result<StepRequest, AcmeError> {
        match self.state {
            AcmeState::Resources => Ok(StepRequest::get(&self.cfg.directory)),
            AcmeState::NewNonce => {
                let directory = self
                    .directory
                    .as_ref()
                    .ok_or_else(|| self.missing_field("newNonce"))?;
                Ok(StepRequest::head(&directory.new_nonce))
            }
            AcmeState::CheckAccount => {
                let directory = self
                    .directory
                    .as_ref()
                    .ok_or_else(|| self.missing_field("newAccount"))?;
                self.signed_post(&directory.new_account, &check_account_payload())
            }
            AcmeState::NewAccount => {
                let contact = self
                    .cfg
                    .contact
                    .as_deref()
                    .ok_or_else(|| AcmeError::MissingContact {
                        section: self.cfg.name.clone(),
                    })?;
                let directory = self
                    .directory
                    .as_ref()
                    .ok_or_else(|| self.missing_field("newAccount"))?;
                self.signed_post(&directory.new_account, &new_account_payload(contact))
            }
            AcmeState::NewOrder => {
                let directory = self
                    .directory
                    .as_ref()
                    .ok_or_else(|| self.missing_field("newOrder"))?;
                self.signed_post(
                    &directory.new_order,
                    &new_order_payload(&self.target.names),
                )
            }
            // POST-as-GET: empty payload, signed protected header
            AcmeState::Auth => self.signed_post(&self.current_auth()?.auth_url, ""),
            AcmeState::Challenge => {
                let auth = self.current_auth()?;
                let url = auth
                    .chall_url
                    .as_deref()
                    .ok_or_else(|| self.missing_field("challenge URL"))?;
                self.signed_post(url, "{}")
            }
            AcmeState::CheckChallenge => {
                let auth = self.current_auth()?;
                let url = auth
                    .chall_url
                    .as_deref()
                    .ok_or_else(|| self.missing_field("challenge URL"))?;
                self.signed_post(url, "")
            }
            AcmeState::Finalize => {
                let url = self
                    .finalize_url
                    .as_deref()
                    .ok_or_else(|| self.missing_field("finalize"))?;
                self.signed_post(url, &finalize_payload(&self.csr_der))
            }
            AcmeState::CheckOrder => {
                let url = self
                    .order_url
                    .as_deref()
                    .ok_or_else(|| self.missing_field("order URL"))?;
                self.signed_post(url, "")
            }
            AcmeState::Certificate => {
                let url = self
                    .certificate_url
                    .as_deref()
                    .ok_or_else(|| self.missing_field("certificate"))?;
                Ok(self.signed_post(url, "")?.accept(PEM_CHAIN))
            }
            AcmeState::End => Err(AcmeError::Malformed {
                what: "done".to_string(),
                message: "state machine already finished".to_string(),
            }),
        }
    }

    /// Enter a state, draining the per-authorization phases when the
    /// authorization list is empty (an order can be `ready` with no auths
    /// and still needs finalizing)
    fn enter(&mut self, state: AcmeState) {
        self.state = state;
        self.next_auth = 0;
        while self.auths.is_empty() {
            match self.state {
                AcmeState::Auth => self.state = AcmeState::Challenge,
                AcmeState::Challenge => self.state = AcmeState::CheckChallenge,
                AcmeState::CheckChallenge => self.state = AcmeState::Finalize,
                _ => break,
            }
        }
    }

    /// Move the cursor to the next authorization, or enter `next_state`
    /// when the list is drained
    fn advance_cursor_or(&mut self, next_state: AcmeState) {
        self.next_auth += 1;
        if self.next_auth >= self.auths.len() {
            self.enter(next_state);
        }
    }

    /// Fail unless the response is 2xx, surfacing the problem document
    fn require_success(&self, response: &StepResponse) -> Result<(), AcmeError> {
        if response.is_success() {
            Ok(())
        } else {
            Err(AcmeError::status(
                response.status,
                self.state.what(),
                &response.body,
            ))
        }
    }

    /// Response phase: harvest headers, classify, advance
    ///
    /// `Replay-Nonce` is installed before the status is looked at, so a
    /// failing response (badNonce included) still refreshes the nonce the
    /// retry will sign with.
    pub fn on_response(&mut self, mut response: StepResponse) -> Result<Progress, AcmeError> {
        if let Some(nonce) = response.nonce.take() {
            self.nonce = Some(nonce);
        }

        match self.state {
            AcmeState::Resources => {
                self.require_success(&response)?;
                let directory: Directory = parse_json(&response.body, self.state.what())?;
                self.directory = Some(directory);
                self.state = AcmeState::NewNonce;
                Ok(Progress::Advanced)
            }

            AcmeState::NewNonce => {
                self.require_success(&response)?;
                if self.nonce.is_none() {
                    return Err(self.missing_header("Replay-Nonce"));
                }
                self.state = AcmeState::CheckAccount;
                Ok(Progress::Advanced)
            }

            AcmeState::CheckAccount => {
                if response.is_success() {
                    self.kid = Some(
                        response
                            .location
                            .take()
                            .ok_or_else(|| self.missing_header("Location"))?,
                    );
                    debug!(kid = %self.kid.as_deref().unwrap_or(""), "Account already exists");
                    self.state = AcmeState::NewOrder;
                    return Ok(Progress::Advanced);
                }
                let err = AcmeError::status(response.status, self.state.what(), &response.body);
                if err.problem().is_some_and(|p| p.is("accountDoesNotExist")) {
                    self.state = AcmeState::NewAccount;
                    return Ok(Progress::Advanced);
                }
                Err(err)
            }

            AcmeState::NewAccount => {
                self.require_success(&response)?;
                self.kid = Some(
                    response
                        .location
                        .take()
                        .ok_or_else(|| self.missing_header("Location"))?,
                );
                info!(kid = %self.kid.as_deref().unwrap_or(""), "ACME account created");
                self.state = AcmeState::NewOrder;
                Ok(Progress::Advanced)
            }

            AcmeState::NewOrder => {
                self.require_success(&response)?;
                let order: OrderBody = parse_json(&response.body, self.state.what())?;
                match order.status.as_str() {
                    // `ready` still walks the (possibly empty) auth list;
                    // finalize is required either way
                    "pending" | "ready" => {}
                    other => {
                        return Err(AcmeError::BadStatus {
                            what: "order",
                            status: other.to_string(),
                            problem: order.error.unwrap_or_default(),
                        })
                    }
                }
                self.order_url = Some(
                    response
                        .location
                        .take()
                        .ok_or_else(|| self.missing_header("Location"))?,
                );
                self.finalize_url =
                    Some(order.finalize.ok_or_else(|| self.missing_field("finalize"))?);
                self.auths = order
                    .authorizations
                    .into_iter()
                    .map(|auth_url| AuthPending {
                        auth_url,
                        chall_url: None,
                        token: None,
                    })
                    .collect();
                debug!(authorizations = self.auths.len(), "Order created");
                self.enter(AcmeState::Auth);
                Ok(Progress::Advanced)
            }

            AcmeState::Auth => {
                self.require_success(&response)?;
                let authz: AuthzBody = parse_json(&response.body, self.state.what())?;
                let wanted = self.cfg.challenge.wire();
                let challenge = select_challenge(&authz.challenges, wanted).ok_or_else(|| {
                    AcmeError::ChallengeNotOffered {
                        wanted: self.cfg.challenge.to_string(),
                        domain: authz.identifier.value.clone(),
                    }
                })?;

                let token = challenge
                    .token
                    .clone()
                    .ok_or_else(|| self.missing_field("token"))?;
                let action = PublishAction {
                    kind: self.cfg.challenge,
                    identifier: authz.identifier.value.clone(),
                    token: token.clone(),
                    key_authorization: jws::key_authorization(&token, &self.cfg.thumbprint),
                };

                let auth = &mut self.auths[self.next_auth];
                auth.chall_url = Some(challenge.url.clone());
                auth.token = Some(token);

                self.advance_cursor_or(AcmeState::Challenge);
                Ok(Progress::PublishAndAdvance(action))
            }

            AcmeState::Challenge => {
                self.require_success(&response)?;
                self.advance_cursor_or(AcmeState::CheckChallenge);
                Ok(Progress::Advanced)
            }

            AcmeState::CheckChallenge => {
                self.require_success(&response)?;
                let challenge: ChallengeStatus = parse_json(&response.body, self.state.what())?;
                match challenge.status.as_str() {
                    "valid" => {
                        self.advance_cursor_or(AcmeState::Finalize);
                        Ok(Progress::Advanced)
                    }
                    status @ ("pending" | "processing") => Err(AcmeError::StillPending {
                        what: "challenge",
                        status: status.to_string(),
                    }),
                    other => Err(AcmeError::BadStatus {
                        what: "challenge",
                        status: other.to_string(),
                        problem: challenge.error.unwrap_or_default(),
                    }),
                }
            }

            AcmeState::Finalize => {
                self.require_success(&response)?;
                self.state = AcmeState::CheckOrder;
                Ok(Progress::Advanced)
            }

            AcmeState::CheckOrder => {
                self.require_success(&response)?;
                let order: OrderBody = parse_json(&response.body, self.state.what())?;
                match order.status.as_str() {
                    "valid" => {
                        self.certificate_url = Some(
                            order
                                .certificate
                                .ok_or_else(|| self.missing_field("certificate"))?,
                        );
                        self.state = AcmeState::Certificate;
                        Ok(Progress::Advanced)
                    }
                    status @ ("pending" | "ready" | "processing") => {
                        Err(AcmeError::StillPending {
                            what: "order",
                            status: status.to_string(),
                        })
                    }
                    other => Err(AcmeError::BadStatus {
                        what: "order",
                        status: other.to_string(),
                        problem: order.error.unwrap_or_default(),
                    }),
                }
            }

            AcmeState::Certificate => {
                self.require_success(&response)?;
                let chain = String::from_utf8(response.body).map_err(|e| AcmeError::Malformed {
                    what: self.state.what().to_string(),
                    message: e.to_string(),
                })?;

                // Only the chain goes into the target; the leaf key
                // installed at trigger time stays where it is.
                self.target.install_chain(chain);
                self.store.install(self.target.clone())?;

                info!(
                    cert = %self.target.path,
                    expires = ?self.target.not_after(),
                    "New certificate installed"
                );
                self.state = AcmeState::End;
                Ok(Progress::Finished)
            }

            AcmeState::End => Err(AcmeError::Malformed {
                what: "done".to_string(),
                message: "response after completion".to_string(),
            }),
        }
    }
}

/// Publish the challenge response produced by an AUTH step
async fn publish(
    publisher: &dyn ChallengePublisher,
    action: &PublishAction,
) -> Result<(), AcmeError> {
    match action.kind {
        ChallengeKind::Http01 => {
            publisher
                .publish_http01(&action.token, &action.key_authorization)
                .await
        }
        ChallengeKind::Dns01 => {
            let record = jws::dns01_record_value(&action.key_authorization)?;
            publisher.publish_dns01(&action.identifier, &record).await
        }
    }
}

/// One request/response round for the current state
async fn step(
    ctx: &mut RenewalContext,
    transport: &dyn AcmeTransport,
    publisher: &dyn ChallengePublisher,
) -> Result<Progress, AcmeError> {
    let request = ctx.build_request()?;
    debug!(state = ?ctx.state, url = %request.url, "Issuing ACME request");

    let response = transport.issue(request).await?;
    let progress = ctx.on_response(response)?;

    if let Progress::PublishAndAdvance(action) = &progress {
        publish(publisher, action).await?;
    }
    Ok(progress)
}

/// Drive one renewal to completion
///
/// Runs until the new certificate is installed or the retry budget of a
/// step is exhausted; the last error is logged and returned in that case.
/// The context, and everything it owns, is dropped on return.
pub async fn drive(
    mut ctx: RenewalContext,
    transport: Arc<dyn AcmeTransport>,
    publisher: Arc<dyn ChallengePublisher>,
) -> Result<(), AcmeError> {
    info!(
        cert = %ctx.cert_path(),
        acme = %ctx.cfg.name,
        directory = %ctx.cfg.directory,
        "Starting ACME renewal"
    );

    let outcome = loop {
        match step(&mut ctx, transport.as_ref(), publisher.as_ref()).await {
            Ok(Progress::Finished) => {
                info!(cert = %ctx.cert_path(), "ACME renewal complete");
                break Ok(());
            }
            Ok(_) => {
                // The state advanced; the next step gets a fresh budget
                ctx.retries = ACME_RETRY;
            }
            Err(err) => {
                ctx.retries = ctx.retries.saturating_sub(1);
                if ctx.retries == 0 {
                    error!(
                        cert = %ctx.cert_path(),
                        state = ?ctx.state,
                        error = %err,
                        "ACME renewal abandoned"
                    );
                    break Err(err);
                }
                warn!(
                    cert = %ctx.cert_path(),
                    state = ?ctx.state,
                    retries_left = ctx.retries,
                    error = %err,
                    "ACME step failed, retrying"
                );
            }
        }
    };

    publisher.cleanup().await;
    outcome
}
