//! Credentials produced by credential actions and principals produced by
//! authentication.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Principal {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Identity evidence awaiting authentication.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    UsernamePassword { username: String, password: String },
    /// Identity asserted by a trusted upstream component.
    PrincipalBearing { principal: Principal },
    Spnego(SpnegoCredential),
}

impl Credential {
    pub fn username_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::UsernamePassword {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn principal_bearing(id: impl Into<String>) -> Self {
        Credential::PrincipalBearing {
            principal: Principal::new(id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credential::UsernamePassword { .. } => "username_password",
            Credential::PrincipalBearing { .. } => "principal_bearing",
            Credential::Spnego(_) => "spnego",
        }
    }

    /// The principal the credential already carries, if any.
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Credential::PrincipalBearing { principal } => Some(principal),
            Credential::Spnego(spnego) => spnego.principal.as_ref(),
            Credential::UsernamePassword { .. } => None,
        }
    }

    pub fn as_spnego(&self) -> Option<&SpnegoCredential> {
        match self {
            Credential::Spnego(spnego) => Some(spnego),
            _ => None,
        }
    }

    pub fn as_spnego_mut(&mut self) -> Option<&mut SpnegoCredential> {
        match self {
            Credential::Spnego(spnego) => Some(spnego),
            _ => None,
        }
    }
}

// Passwords and tokens stay out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"[redacted]")
                .finish(),
            Credential::PrincipalBearing { principal } => f
                .debug_struct("PrincipalBearing")
                .field("principal", &principal.id)
                .finish(),
            Credential::Spnego(spnego) => fmt::Debug::fmt(spnego, f),
        }
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::UsernamePassword { username, .. } => write!(f, "[username: {}]", username),
            Credential::PrincipalBearing { principal } => write!(f, "[principal: {}]", principal),
            Credential::Spnego(spnego) => match &spnego.principal {
                Some(principal) => write!(f, "[spnego principal: {}]", principal),
                None => f.write_str("[spnego: unresolved]"),
            },
        }
    }
}

// ──────────────────────────────────────────────
// SPNEGO
// ──────────────────────────────────────────────

const NTLMSSP_SIGNATURE: &[u8] = b"NTLMSSP\0";

/// A negotiation round: the inbound token, the continuation token the
/// acceptor produced, and the principal once negotiation completes.
#[derive(Clone, PartialEq, Eq)]
pub struct SpnegoCredential {
    pub initial_token: Vec<u8>,
    pub next_token: Option<Vec<u8>>,
    pub principal: Option<Principal>,
}

impl SpnegoCredential {
    pub fn new(initial_token: Vec<u8>) -> Self {
        SpnegoCredential {
            initial_token,
            next_token: None,
            principal: None,
        }
    }

    /// NTLM tokens start with the `NTLMSSP\0` signature.
    pub fn is_ntlm(&self) -> bool {
        self.initial_token.starts_with(NTLMSSP_SIGNATURE)
    }
}

impl fmt::Debug for SpnegoCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpnegoCredential")
            .field("initial_token_len", &self.initial_token.len())
            .field("next_token_len", &self.next_token.as_ref().map(Vec::len))
            .field("principal", &self.principal.as_ref().map(|p| p.id.as_str()))
            .field("ntlm", &self.is_ntlm())
            .finish()
    }
}
