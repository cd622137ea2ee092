//! Simple handlers: a static user table and pass-through for credentials
//! that already carry a principal.

use std::collections::BTreeMap;

use portcullis_core::{Credential, Principal};

use crate::authentication::{AuthenticationError, AuthenticationHandler};

/// Accepts username/password pairs from a fixed table.
#[derive(Debug, Clone, Default)]
pub struct AcceptUsersHandler {
    users: BTreeMap<String, String>,
}

impl AcceptUsersHandler {
    pub fn new<I, U, P>(users: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        AcceptUsersHandler {
            users: users
                .into_iter()
                .map(|(u, p)| (u.into(), p.into()))
                .collect(),
        }
    }
}

impl AuthenticationHandler for AcceptUsersHandler {
    fn name(&self) -> &str {
        "acceptUsers"
    }

    fn supports(&self, credential: &Credential) -> bool {
        matches!(credential, Credential::UsernamePassword { .. })
    }

    fn authenticate(&self, credential: &mut Credential) -> Result<Principal, AuthenticationError> {
        let Credential::UsernamePassword { username, password } = &*credential else {
            return Err(AuthenticationError::Unsupported(credential.kind()));
        };
        // Unknown users and wrong passwords are indistinguishable to callers.
        match self.users.get(username.as_str()) {
            Some(expected) if expected == password => Ok(Principal::new(username.clone())),
            _ => Err(AuthenticationError::BadCredentials),
        }
    }
}

/// Trusts the principal a credential already carries.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrincipalBearingHandler;

impl AuthenticationHandler for PrincipalBearingHandler {
    fn name(&self) -> &str {
        "principalBearing"
    }

    fn supports(&self, credential: &Credential) -> bool {
        matches!(credential, Credential::PrincipalBearing { .. })
    }

    fn authenticate(&self, credential: &mut Credential) -> Result<Principal, AuthenticationError> {
        match credential {
            Credential::PrincipalBearing { principal } => Ok(principal.clone()),
            other => Err(AuthenticationError::Unsupported(other.kind())),
        }
    }
}
