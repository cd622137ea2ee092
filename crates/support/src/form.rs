//! Username/password submitted through the login form.

use portcullis_core::{Credential, RequestContext};

use crate::noninteractive::CredentialExtractor;

pub const USERNAME_PARAMETER: &str = "username";
pub const PASSWORD_PARAMETER: &str = "password";

/// Reads `username` and `password` request parameters. A blank username
/// yields no credential; a blank password is left for handlers to refuse.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsernamePasswordFormExtractor;

impl CredentialExtractor for UsernamePasswordFormExtractor {
    fn name(&self) -> &str {
        "authenticateForm"
    }

    fn construct_credential(&self, ctx: &RequestContext) -> Option<Credential> {
        let request = ctx.request();
        let username = request.parameter(USERNAME_PARAMETER)?.trim();
        if username.is_empty() {
            return None;
        }
        let password = request.parameter(PASSWORD_PARAMETER).unwrap_or_default();
        Some(Credential::username_password(username, password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portcullis_core::{ExternalContext, ExternalRequest};

    #[test]
    fn blank_username_yields_nothing() {
        let ctx = RequestContext::new(ExternalContext::new(
            ExternalRequest::new().with_parameter("username", "  "),
        ));
        assert_eq!(UsernamePasswordFormExtractor.construct_credential(&ctx), None);
    }

    #[test]
    fn missing_password_is_empty() {
        let ctx = RequestContext::new(ExternalContext::new(
            ExternalRequest::new().with_parameter("username", "alice"),
        ));
        assert_eq!(
            UsernamePasswordFormExtractor.construct_credential(&ctx),
            Some(Credential::username_password("alice", ""))
        );
    }
}
