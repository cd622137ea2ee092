//! SPNEGO (Kerberos or NTLM) negotiation over the `Authorization` header.
//!
//! The extractor decodes the client's token; a [`Negotiator`] stands in
//! for the GSS acceptor and decides the round's outcome. On every outcome
//! the response carries the continuation token and, while negotiation is
//! unfinished, a `401` status.

use std::collections::HashMap;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD as BASE64_STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use http::header::{HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use http::StatusCode;
use tracing::{debug, warn};

use portcullis_core::{Credential, Principal, RequestContext, SpnegoCredential};

use crate::authentication::{AuthenticationError, AuthenticationHandler};
use crate::noninteractive::CredentialExtractor;

pub const NEGOTIATE: &str = "Negotiate";
pub const NTLM: &str = "NTLM";

// Clients are inconsistent about padding.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decodes a token, tolerating missing or surplus `=` padding.
pub fn decode_token(payload: &str) -> Option<Vec<u8>> {
    let trimmed = payload.trim().trim_end_matches('=');
    if trimmed.is_empty() {
        return None;
    }
    LENIENT.decode(trimmed).ok()
}

// ──────────────────────────────────────────────
// Credential extraction
// ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SpnegoCredentialsExtractor {
    ntlm: bool,
    message_prefix: String,
}

impl SpnegoCredentialsExtractor {
    pub fn new(ntlm: bool) -> Self {
        let scheme = if ntlm { NTLM } else { NEGOTIATE };
        SpnegoCredentialsExtractor {
            ntlm,
            message_prefix: format!("{} ", scheme),
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.ntlm {
            NTLM
        } else {
            NEGOTIATE
        }
    }

    fn set_response_header(&self, ctx: &mut RequestContext) {
        let Some(spnego) = ctx.credential().and_then(Credential::as_spnego) else {
            return;
        };
        let next_token = spnego.next_token.clone();
        let unresolved = spnego.principal.is_none();

        let response = ctx.response_mut();
        if let Some(token) = next_token {
            let value = format!("{} {}", self.scheme(), BASE64_STANDARD.encode(token));
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    response.headers.insert(WWW_AUTHENTICATE, value);
                }
                Err(e) => warn!(error = %e, "could not encode negotiation reply"),
            }
        }
        if unresolved {
            response.status = StatusCode::UNAUTHORIZED;
        }
    }
}

impl Default for SpnegoCredentialsExtractor {
    fn default() -> Self {
        SpnegoCredentialsExtractor::new(false)
    }
}

impl CredentialExtractor for SpnegoCredentialsExtractor {
    fn name(&self) -> &str {
        "spnego"
    }

    fn construct_credential(&self, ctx: &RequestContext) -> Option<Credential> {
        let authorization = ctx.request().header(AUTHORIZATION)?;
        let payload = authorization.strip_prefix(self.message_prefix.as_str())?;
        match decode_token(payload) {
            Some(token) => {
                debug!(scheme = self.scheme(), len = token.len(), "negotiation token received");
                Some(Credential::Spnego(SpnegoCredential::new(token)))
            }
            None => {
                debug!(scheme = self.scheme(), "undecodable negotiation token");
                None
            }
        }
    }

    fn on_success(&self, ctx: &mut RequestContext) {
        self.set_response_header(ctx);
    }

    fn on_error(&self, ctx: &mut RequestContext) {
        self.set_response_header(ctx);
    }
}

// ──────────────────────────────────────────────
// Acceptance
// ──────────────────────────────────────────────

/// Result of accepting one inbound token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Negotiation {
    pub principal: Option<Principal>,
    pub next_token: Option<Vec<u8>>,
}

/// The security-context acceptor. Implementations may block.
pub trait Negotiator: Send + Sync {
    fn accept(&self, token: &[u8], ntlm: bool) -> Result<Negotiation, AuthenticationError>;
}

pub struct SpnegoAuthenticationHandler<N> {
    negotiator: N,
}

impl<N: Negotiator> SpnegoAuthenticationHandler<N> {
    pub fn new(negotiator: N) -> Self {
        SpnegoAuthenticationHandler { negotiator }
    }
}

impl<N: Negotiator> AuthenticationHandler for SpnegoAuthenticationHandler<N> {
    fn name(&self) -> &str {
        "spnego"
    }

    fn supports(&self, credential: &Credential) -> bool {
        credential.as_spnego().is_some()
    }

    fn authenticate(&self, credential: &mut Credential) -> Result<Principal, AuthenticationError> {
        let kind = credential.kind();
        let spnego = credential
            .as_spnego_mut()
            .ok_or(AuthenticationError::Unsupported(kind))?;
        let negotiation = self.negotiator.accept(&spnego.initial_token, spnego.is_ntlm())?;
        spnego.next_token = negotiation.next_token;
        spnego.principal = negotiation.principal.clone();
        negotiation
            .principal
            .ok_or(AuthenticationError::NegotiationIncomplete)
    }
}

/// Fixed token table, for simulations and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticNegotiator {
    tokens: HashMap<Vec<u8>, Negotiation>,
}

impl StaticNegotiator {
    pub fn new() -> Self {
        StaticNegotiator::default()
    }

    pub fn with_token(mut self, token: impl Into<Vec<u8>>, negotiation: Negotiation) -> Self {
        self.tokens.insert(token.into(), negotiation);
        self
    }
}

impl Negotiator for StaticNegotiator {
    fn accept(&self, token: &[u8], _ntlm: bool) -> Result<Negotiation, AuthenticationError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthenticationError::BadCredentials)
    }
}
