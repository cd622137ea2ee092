//! portcullis-support: credential actions and authentication handlers.
//!
//! Non-interactive credential actions pull identity evidence out of the
//! inbound request (a SPNEGO token, a trusted remote user, a proxy
//! header) and authenticate it through an [`AuthenticationManager`].
//! They plug into flows as ordinary actions signalling `success` or
//! `error`.

pub mod authentication;
pub mod form;
pub mod handlers;
pub mod ldap;
pub mod noninteractive;
pub mod spnego;
pub mod trusted;

pub use authentication::{AuthenticationError, AuthenticationHandler, AuthenticationManager};
pub use form::UsernamePasswordFormExtractor;
pub use handlers::{AcceptUsersHandler, PrincipalBearingHandler};
pub use ldap::{
    DirectoryBindHandler, DirectoryClient, DirectoryEntry, DirectoryError, LdapSettings,
    StaticDirectory,
};
pub use noninteractive::{CredentialExtractor, NonInteractiveCredentialsAction};
pub use spnego::{
    Negotiation, Negotiator, SpnegoAuthenticationHandler, SpnegoCredentialsExtractor,
    StaticNegotiator,
};
pub use trusted::{RemoteUserPrincipalExtractor, RequestHeaderPrincipalExtractor};
