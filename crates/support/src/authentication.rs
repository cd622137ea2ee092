//! Authentication handlers and the manager that consults them.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use portcullis_core::{ActionError, Credential, FailureKind, Principal};

use crate::ldap::DirectoryError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthenticationError {
    #[error("no handler supports {0} credentials")]
    Unsupported(&'static str),

    #[error("bad credentials")]
    BadCredentials,

    #[error("account is locked")]
    AccountLocked,

    #[error("account is disabled")]
    AccountDisabled,

    #[error("password has expired")]
    PasswordExpired,

    #[error("principal could not be resolved: {0}")]
    UnresolvedPrincipal(String),

    #[error("negotiation did not produce a principal")]
    NegotiationIncomplete,

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl AuthenticationError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AuthenticationError::Unsupported(_) => FailureKind::Authentication,
            AuthenticationError::BadCredentials => FailureKind::BadCredentials,
            AuthenticationError::AccountLocked => FailureKind::AccountLocked,
            AuthenticationError::AccountDisabled => FailureKind::AccountDisabled,
            AuthenticationError::PasswordExpired => FailureKind::PasswordExpired,
            AuthenticationError::UnresolvedPrincipal(_) => FailureKind::UnresolvedPrincipal,
            AuthenticationError::NegotiationIncomplete => FailureKind::Negotiation,
            AuthenticationError::Directory(_) => FailureKind::Directory,
        }
    }

    /// True when the credential itself was refused, as opposed to the
    /// infrastructure failing.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, AuthenticationError::Directory(_))
    }
}

impl From<AuthenticationError> for ActionError {
    fn from(e: AuthenticationError) -> Self {
        ActionError::new(e.failure_kind(), e.to_string())
    }
}

/// Verifies one family of credentials. May block.
pub trait AuthenticationHandler: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, credential: &Credential) -> bool;

    /// Handlers may update the credential, e.g. with a negotiation reply.
    fn authenticate(&self, credential: &mut Credential) -> Result<Principal, AuthenticationError>;
}

/// Ordered handlers. Every handler supporting the credential is tried in
/// turn; the first success wins, otherwise the last failure is returned.
#[derive(Clone, Default)]
pub struct AuthenticationManager {
    handlers: Vec<Arc<dyn AuthenticationHandler>>,
}

impl AuthenticationManager {
    pub fn new() -> Self {
        AuthenticationManager::default()
    }

    pub fn with_handler(mut self, handler: impl AuthenticationHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn authenticate(&self, credential: &mut Credential) -> Result<Principal, AuthenticationError> {
        let mut last_error = None;
        for handler in self.handlers.iter() {
            if !handler.supports(credential) {
                continue;
            }
            match handler.authenticate(credential) {
                Ok(principal) => {
                    info!(handler = handler.name(), principal = %principal, "authenticated");
                    return Ok(principal);
                }
                Err(e) => {
                    debug!(handler = handler.name(), credential = %credential, error = %e, "handler refused credential");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(AuthenticationError::Unsupported(credential.kind())))
    }
}

impl fmt::Debug for AuthenticationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.handler_names()).finish()
    }
}
