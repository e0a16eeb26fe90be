//! HTTP step driver for the ACME state machine
//!
//! One protocol step is one request/response round trip. The driver is a
//! trait so the state machine can be exercised against a scripted transport
//! in tests; the production implementation wraps [`reqwest::Client`]. The
//! response surfaces the two headers the protocol cares about
//! (`Replay-Nonce`, `Location`) next to the status and body so callers can
//! harvest them before classifying the status.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};

use super::error::AcmeError;

/// Content type of every signed ACME request
pub const JOSE_JSON: &str = "application/jose+json";

/// Accept value for the certificate download
pub const PEM_CHAIN: &str = "application/pem-certificate-chain";

/// Per-request timeout; a timed-out step consumes one retry
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP method of a protocol step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMethod {
    Get,
    Head,
    Post,
}

/// One request the state machine wants on the wire
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub method: StepMethod,
    pub url: String,
    pub content_type: Option<&'static str>,
    pub accept: Option<&'static str>,
    pub body: Option<String>,
}

impl StepRequest {
    /// Plain GET (the unauthenticated directory fetch)
    pub fn get(url: impl Into<String>) -> Self {
        StepRequest {
            method: StepMethod::Get,
            url: url.into(),
            content_type: None,
            accept: None,
            body: None,
        }
    }

    /// HEAD, used against newNonce
    pub fn head(url: impl Into<String>) -> Self {
        StepRequest {
            method: StepMethod::Head,
            url: url.into(),
            content_type: None,
            accept: None,
            body: None,
        }
    }

    /// Signed POST carrying a flattened JWS body
    pub fn post_jose(url: impl Into<String>, body: String) -> Self {
        StepRequest {
            method: StepMethod::Post,
            url: url.into(),
            content_type: Some(JOSE_JSON),
            accept: None,
            body: Some(body),
        }
    }

    /// Set the Accept header
    pub fn accept(mut self, accept: &'static str) -> Self {
        self.accept = Some(accept);
        self
    }
}

/// What came back from one protocol step
#[derive(Debug, Clone, Default)]
pub struct StepResponse {
    pub status: u16,
    /// `Replay-Nonce` header, installed into the context on every response
    pub nonce: Option<String>,
    /// `Location` header, meaningful on account and order creation
    pub location: Option<String>,
    pub body: Vec<u8>,
}

impl StepResponse {
    /// 2xx check
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The seam between the state machine and the HTTP client
#[async_trait]
pub trait AcmeTransport: Send + Sync {
    /// Issue one request and wait for the complete response
    async fn issue(&self, request: StepRequest) -> Result<StepResponse, AcmeError>;
}

/// Production transport over [`reqwest::Client`]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client with the ACME request timeout applied
    pub fn new() -> Result<Self, AcmeError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("rampart/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AcmeError::Transport(e.to_string()))?;
        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl AcmeTransport for HttpTransport {
    async fn issue(&self, request: StepRequest) -> Result<StepResponse, AcmeError> {
        let mut builder = match request.method {
            StepMethod::Get => self.client.get(&request.url),
            StepMethod::Head => self.client.head(&request.url),
            StepMethod::Post => self.client.post(&request.url),
        };
        if let Some(content_type) = request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        if let Some(accept) = request.accept {
            builder = builder.header(ACCEPT, accept);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AcmeError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let nonce = response
            .headers()
            .get("replay-nonce")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let location = response
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response
            .bytes()
            .await
            .map_err(|e| AcmeError::Transport(e.to_string()))?
            .to_vec();

        Ok(StepResponse {
            status,
            nonce,
            location,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_jose_sets_the_content_type() {
        let request = StepRequest::post_jose("https://ca/acme/new-order", "{}".to_string());
        assert_eq!(request.method, StepMethod::Post);
        assert_eq!(request.content_type, Some(JOSE_JSON));
        assert_eq!(request.body.as_deref(), Some("{}"));
    }

    #[test]
    fn accept_header_is_opt_in() {
        let request = StepRequest::post_jose("https://ca/cert/1", String::new()).accept(PEM_CHAIN);
        assert_eq!(request.accept, Some(PEM_CHAIN));
        assert_eq!(StepRequest::get("https://ca/dir").accept, None);
    }

    #[test]
    fn success_classification() {
        let ok = StepResponse {
            status: 201,
            ..Default::default()
        };
        assert!(ok.is_success());

        let bad = StepResponse {
            status: 400,
            ..Default::default()
        };
        assert!(!bad.is_success());
    }
}
