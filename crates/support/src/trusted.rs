//! Credentials asserted by a trusted fronting component.

use http::header::HeaderName;
use tracing::debug;

use portcullis_core::{Credential, RequestContext};

use crate::noninteractive::CredentialExtractor;

/// Uses the principal name the container already authenticated.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteUserPrincipalExtractor;

impl CredentialExtractor for RemoteUserPrincipalExtractor {
    fn name(&self) -> &str {
        "principalFromRemoteUser"
    }

    fn construct_credential(&self, ctx: &RequestContext) -> Option<Credential> {
        let user = ctx.request().remote_user.as_deref()?;
        if user.is_empty() {
            return None;
        }
        debug!(user, "remote user present");
        Some(Credential::principal_bearing(user))
    }
}

/// Reads the principal name from a header set by an authenticating proxy.
#[derive(Debug, Clone)]
pub struct RequestHeaderPrincipalExtractor {
    header: HeaderName,
}

impl RequestHeaderPrincipalExtractor {
    pub fn new(header: HeaderName) -> Self {
        RequestHeaderPrincipalExtractor { header }
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }
}

impl CredentialExtractor for RequestHeaderPrincipalExtractor {
    fn name(&self) -> &str {
        "principalFromRequestHeader"
    }

    fn construct_credential(&self, ctx: &RequestContext) -> Option<Credential> {
        let value = ctx.request().header(&self.header)?.trim();
        if value.is_empty() {
            return None;
        }
        debug!(header = %self.header, user = value, "principal header present");
        Some(Credential::principal_bearing(value))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::header::HeaderValue;
    use portcullis_core::{Action, Event, ExternalContext, ExternalRequest};

    use super::*;
    use crate::authentication::AuthenticationManager;
    use crate::handlers::PrincipalBearingHandler;
    use crate::noninteractive::NonInteractiveCredentialsAction;

    fn run<E: CredentialExtractor>(extractor: E, request: ExternalRequest) -> (Event, RequestContext) {
        let action = NonInteractiveCredentialsAction::new(
            extractor,
            Arc::new(AuthenticationManager::new().with_handler(PrincipalBearingHandler)),
        );
        let mut ctx = RequestContext::new(ExternalContext::new(request));
        let event = action.execute(&mut ctx).unwrap();
        (event, ctx)
    }

    #[test]
    fn remote_user_becomes_principal() {
        let (event, ctx) = run(
            RemoteUserPrincipalExtractor,
            ExternalRequest::new().with_remote_user("alice"),
        );
        assert_eq!(event, Event::success());
        assert_eq!(ctx.principal().map(|p| p.id.as_str()), Some("alice"));
        assert_eq!(
            ctx.credential(),
            Some(&Credential::principal_bearing("alice"))
        );
    }

    #[test]
    fn absent_remote_user_is_an_error_event() {
        let (event, ctx) = run(RemoteUserPrincipalExtractor, ExternalRequest::new());
        assert_eq!(event, Event::error());
        assert!(ctx.credential().is_none());
        assert!(ctx.principal().is_none());
    }

    #[test]
    fn header_principal_is_trimmed() {
        let header = HeaderName::from_static("x-remote-user");
        let request = ExternalRequest::new()
            .with_header(header.clone(), HeaderValue::from_static(" bob "));
        let (event, ctx) = run(RequestHeaderPrincipalExtractor::new(header.clone()), request);
        assert_eq!(event, Event::success());
        assert_eq!(ctx.principal().map(|p| p.id.as_str()), Some("bob"));

        let blank = ExternalRequest::new().with_header(header.clone(), HeaderValue::from_static("  "));
        let (event, _) = run(RequestHeaderPrincipalExtractor::new(header), blank);
        assert_eq!(event, Event::error());
    }
}
