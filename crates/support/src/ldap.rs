//! Username/password authentication by search-then-bind against a
//! directory.
//!
//! The handler finds the user's entry with a configured filter and then
//! binds as that entry with the submitted password. The directory itself
//! sits behind [`DirectoryClient`].

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{debug, warn};

use portcullis_core::{Credential, Principal};

use crate::authentication::{AuthenticationError, AuthenticationHandler};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        DirectoryEntry {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// A referral or size limit cut the search short.
    #[error("partial search result: {message}")]
    PartialResult {
        entries: Vec<DirectoryEntry>,
        message: String,
    },

    /// The bind was refused. `diagnostic` is the server's message text.
    #[error("bind refused: {diagnostic}")]
    BindRefused { diagnostic: String },

    #[error("directory operation failed: {0}")]
    Operation(String),
}

/// Blocking directory operations.
pub trait DirectoryClient: Send + Sync {
    fn search(&self, base: &str, filter: &str) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    fn bind(&self, dn: &str, password: &str) -> Result<(), DirectoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("filter '{0}' must contain %u or %U")]
    MissingPlaceholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LdapSettings {
    pub search_base: String,
    /// `%u` is replaced by the username, `%U` by the username without any
    /// `@domain` suffix.
    pub filter: String,
    #[serde(default)]
    pub ignore_partial_result: bool,
    /// Entry attributes copied onto the principal.
    #[serde(default)]
    pub principal_attributes: Vec<String>,
}

impl LdapSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.filter.contains("%u") || self.filter.contains("%U") {
            Ok(())
        } else {
            Err(SettingsError::MissingPlaceholder(self.filter.clone()))
        }
    }
}

// ──────────────────────────────────────────────
// Filters
// ──────────────────────────────────────────────

/// Escapes a value for use inside a search filter.
pub fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            c => out.push(c),
        }
    }
    out
}

/// Substitutes `%u` and `%U` in a single pass so a username containing a
/// placeholder is never expanded twice.
pub fn filter_with_values(filter: &str, username: &str) -> String {
    let full = escape_filter_value(username);
    let local = escape_filter_value(username.split('@').next().unwrap_or(username));

    let mut out = String::with_capacity(filter.len() + full.len());
    let mut chars = filter.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            match chars.peek() {
                Some('u') => {
                    chars.next();
                    out.push_str(&full);
                    continue;
                }
                Some('U') => {
                    chars.next();
                    out.push_str(&local);
                    continue;
                }
                _ => {}
            }
        }
        out.push(c);
    }
    out
}

/// Maps directory bind diagnostics onto account conditions. Recognises the
/// Active Directory `data <code>` sub-codes.
pub fn translate_bind_refusal(diagnostic: &str) -> AuthenticationError {
    let code = diagnostic
        .split("data ")
        .nth(1)
        .and_then(|rest| rest.split(|c: char| !c.is_ascii_hexdigit()).next());
    match code {
        Some("775") => AuthenticationError::AccountLocked,
        Some("533") => AuthenticationError::AccountDisabled,
        Some("532") | Some("773") => AuthenticationError::PasswordExpired,
        _ => AuthenticationError::BadCredentials,
    }
}

// ──────────────────────────────────────────────
// Handler
// ──────────────────────────────────────────────

pub struct DirectoryBindHandler<D> {
    directory: D,
    settings: LdapSettings,
}

impl<D: DirectoryClient> DirectoryBindHandler<D> {
    pub fn new(directory: D, settings: LdapSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        Ok(DirectoryBindHandler {
            directory,
            settings,
        })
    }

    pub fn settings(&self) -> &LdapSettings {
        &self.settings
    }

    fn find_entry(&self, username: &str) -> Result<DirectoryEntry, AuthenticationError> {
        let filter = filter_with_values(&self.settings.filter, username);
        let entries = match self.directory.search(&self.settings.search_base, &filter) {
            Ok(entries) => entries,
            Err(DirectoryError::PartialResult { entries, message })
                if self.settings.ignore_partial_result =>
            {
                debug!(reason = %message, "ignoring partial search result");
                entries
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = entries.into_iter();
        match (entries.next(), entries.next()) {
            (Some(entry), None) => Ok(entry),
            (None, _) => {
                debug!(filter = %filter, "search returned no entries");
                Err(AuthenticationError::BadCredentials)
            }
            (Some(_), Some(_)) => {
                warn!(filter = %filter, "search returned multiple entries");
                Err(AuthenticationError::BadCredentials)
            }
        }
    }
}

impl<D: DirectoryClient> AuthenticationHandler for DirectoryBindHandler<D> {
    fn name(&self) -> &str {
        "directoryBind"
    }

    fn supports(&self, credential: &Credential) -> bool {
        matches!(credential, Credential::UsernamePassword { .. })
    }

    fn authenticate(&self, credential: &mut Credential) -> Result<Principal, AuthenticationError> {
        let Credential::UsernamePassword { username, password } = &*credential else {
            return Err(AuthenticationError::Unsupported(credential.kind()));
        };
        // An empty password is an anonymous bind on most servers.
        if password.is_empty() {
            return Err(AuthenticationError::BadCredentials);
        }

        let entry = self.find_entry(username)?;
        match self.directory.bind(&entry.dn, password) {
            Ok(()) => {}
            Err(DirectoryError::BindRefused { diagnostic }) => {
                return Err(translate_bind_refusal(&diagnostic));
            }
            Err(e) => return Err(e.into()),
        }

        let mut principal = Principal::new(username.clone());
        for name in &self.settings.principal_attributes {
            if let Some(value) = entry.attributes.get(name).and_then(|v| v.first()) {
                principal.attributes.insert(name.clone(), value.clone());
            }
        }
        Ok(principal)
    }
}

// ──────────────────────────────────────────────
// In-memory directory
// ──────────────────────────────────────────────

/// A fixed set of entries with their bind passwords. Answers equality
/// filters of the form `(attribute=value)` only.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    entries: Vec<(DirectoryEntry, String)>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        StaticDirectory::default()
    }

    pub fn with_entry(mut self, entry: DirectoryEntry, password: impl Into<String>) -> Self {
        self.entries.push((entry, password.into()));
        self
    }
}

impl DirectoryClient for StaticDirectory {
    fn search(&self, _base: &str, filter: &str) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let (name, value) = filter
            .strip_prefix('(')
            .and_then(|f| f.strip_suffix(')'))
            .and_then(|f| f.split_once('='))
            .filter(|(name, _)| !name.is_empty() && !name.contains(['(', ')', '&', '|', '!']))
            .ok_or_else(|| DirectoryError::Operation(format!("unsupported filter '{}'", filter)))?;

        Ok(self
            .entries
            .iter()
            .map(|(entry, _)| entry)
            .filter(|entry| {
                entry
                    .attributes
                    .get(name)
                    .is_some_and(|values| values.iter().any(|v| escape_filter_value(v) == value))
            })
            .cloned()
            .collect())
    }

    fn bind(&self, dn: &str, password: &str) -> Result<(), DirectoryError> {
        match self.entries.iter().find(|(entry, _)| entry.dn == dn) {
            Some((_, expected)) if expected == password => Ok(()),
            _ => Err(DirectoryError::BindRefused {
                diagnostic: "invalid credentials".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct FakeDirectory {
        search: Result<Vec<DirectoryEntry>, DirectoryError>,
        bind: Result<(), DirectoryError>,
        filters: Mutex<Vec<String>>,
    }

    impl FakeDirectory {
        fn new(search: Result<Vec<DirectoryEntry>, DirectoryError>) -> Self {
            FakeDirectory {
                search,
                bind: Ok(()),
                filters: Mutex::new(Vec::new()),
            }
        }
    }

    impl DirectoryClient for FakeDirectory {
        fn search(&self, _base: &str, filter: &str) -> Result<Vec<DirectoryEntry>, DirectoryError> {
            self.filters.lock().unwrap().push(filter.to_string());
            self.search.clone()
        }

        fn bind(&self, _dn: &str, _password: &str) -> Result<(), DirectoryError> {
            self.bind.clone()
        }
    }

    fn settings(filter: &str) -> LdapSettings {
        LdapSettings {
            search_base: "ou=people,dc=example,dc=org".into(),
            filter: filter.into(),
            ignore_partial_result: false,
            principal_attributes: vec!["mail".into()],
        }
    }

    fn alice() -> DirectoryEntry {
        DirectoryEntry::new("uid=alice,ou=people,dc=example,dc=org")
            .with_attribute("mail", "alice@example.org")
    }

    #[test]
    fn filter_requires_a_placeholder() {
        assert_eq!(
            DirectoryBindHandler::new(FakeDirectory::new(Ok(vec![])), settings("(uid=alice)")).err(),
            Some(SettingsError::MissingPlaceholder("(uid=alice)".into()))
        );
    }

    #[test]
    fn placeholders_are_expanded_once_and_escaped() {
        assert_eq!(
            filter_with_values("(&(mail=%u)(uid=%U))", "al*ce@example.org"),
            "(&(mail=al\\2ace@example.org)(uid=al\\2ace))"
        );
        assert_eq!(filter_with_values("(uid=%u)", "%U"), "(uid=%U)");
    }

    #[test]
    fn bind_success_copies_attributes() {
        let handler =
            DirectoryBindHandler::new(FakeDirectory::new(Ok(vec![alice()])), settings("(uid=%u)"))
                .unwrap();
        let mut credential = Credential::username_password("alice", "secret");
        let principal = handler.authenticate(&mut credential).unwrap();
        assert_eq!(principal.id, "alice");
        assert_eq!(
            principal.attributes.get("mail").map(String::as_str),
            Some("alice@example.org")
        );
        assert_eq!(*handler.directory.filters.lock().unwrap(), vec!["(uid=alice)"]);
    }

    #[test]
    fn ambiguous_or_missing_entries_are_rejected() {
        let none = DirectoryBindHandler::new(FakeDirectory::new(Ok(vec![])), settings("(uid=%u)"))
            .unwrap();
        let two = DirectoryBindHandler::new(
            FakeDirectory::new(Ok(vec![alice(), alice()])),
            settings("(uid=%u)"),
        )
        .unwrap();
        for handler in [none, two] {
            let mut credential = Credential::username_password("alice", "secret");
            assert_eq!(
                handler.authenticate(&mut credential),
                Err(AuthenticationError::BadCredentials)
            );
        }
    }

    #[test]
    fn empty_password_never_reaches_the_directory() {
        let handler =
            DirectoryBindHandler::new(FakeDirectory::new(Ok(vec![alice()])), settings("(uid=%u)"))
                .unwrap();
        let mut credential = Credential::username_password("alice", "");
        assert_eq!(
            handler.authenticate(&mut credential),
            Err(AuthenticationError::BadCredentials)
        );
        assert!(handler.directory.filters.lock().unwrap().is_empty());
    }

    #[test]
    fn partial_results_honour_the_setting() {
        let partial = || -> Result<Vec<DirectoryEntry>, DirectoryError> {
            Err(DirectoryError::PartialResult {
                entries: vec![alice()],
                message: "referral".into(),
            })
        };
        let strict =
            DirectoryBindHandler::new(FakeDirectory::new(partial()), settings("(uid=%u)")).unwrap();
        let mut credential = Credential::username_password("alice", "secret");
        assert!(matches!(
            strict.authenticate(&mut credential),
            Err(AuthenticationError::Directory(DirectoryError::PartialResult { .. }))
        ));

        let mut lenient_settings = settings("(uid=%u)");
        lenient_settings.ignore_partial_result = true;
        let lenient =
            DirectoryBindHandler::new(FakeDirectory::new(partial()), lenient_settings).unwrap();
        assert!(lenient.authenticate(&mut credential).is_ok());
    }

    #[test]
    fn bind_refusals_are_translated() {
        let mut directory = FakeDirectory::new(Ok(vec![alice()]));
        directory.bind = Err(DirectoryError::BindRefused {
            diagnostic: "80090308: LdapErr: DSID-0C09030B, comment: AcceptSecurityContext error, data 775, v893".into(),
        });
        let handler = DirectoryBindHandler::new(directory, settings("(uid=%u)")).unwrap();
        let mut credential = Credential::username_password("alice", "secret");
        assert_eq!(
            handler.authenticate(&mut credential),
            Err(AuthenticationError::AccountLocked)
        );
        assert_eq!(
            translate_bind_refusal("invalid credentials"),
            AuthenticationError::BadCredentials
        );
    }

    #[test]
    fn settings_deserialize_from_kebab_case() {
        let parsed: LdapSettings = serde_json::from_value(serde_json::json!({
            "search-base": "ou=people,dc=example,dc=org",
            "filter": "(uid=%U)",
            "principal-attributes": ["mail"],
        }))
        .unwrap();
        assert_eq!(parsed.search_base, "ou=people,dc=example,dc=org");
        assert!(!parsed.ignore_partial_result);
        assert_eq!(parsed.principal_attributes, vec!["mail".to_string()]);
    }

    #[test]
    fn static_directory_searches_and_binds() {
        let directory = StaticDirectory::new().with_entry(
            DirectoryEntry::new("uid=carol,ou=people,dc=example,dc=org")
                .with_attribute("uid", "carol")
                .with_attribute("mail", "carol@example.org"),
            "hunter2",
        );
        let handler = DirectoryBindHandler::new(directory, settings("(uid=%U)")).unwrap();

        let mut credential = Credential::username_password("carol@example.org", "hunter2");
        let principal = handler.authenticate(&mut credential).unwrap();
        assert_eq!(principal.id, "carol@example.org");
        assert_eq!(
            principal.attributes.get("mail").map(String::as_str),
            Some("carol@example.org")
        );

        let mut wrong = Credential::username_password("carol", "nope");
        assert_eq!(
            handler.authenticate(&mut wrong),
            Err(AuthenticationError::BadCredentials)
        );
        assert!(matches!(
            handler.directory.search("", "(&(uid=carol)(mail=x))"),
            Err(DirectoryError::Operation(_))
        ));
    }
}
