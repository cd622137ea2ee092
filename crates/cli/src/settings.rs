//! TOML settings for the credential actions and views the CLI wires up.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use http::header::HeaderName;
use serde::Deserialize;

use portcullis_core::{Principal, TemplateViewFactory};
use portcullis_support::ldap;
use portcullis_support::spnego::decode_token;
use portcullis_support::{
    DirectoryBindHandler, DirectoryEntry, LdapSettings, Negotiation, StaticDirectory,
    StaticNegotiator,
};

#[derive(Debug, thiserror::Error)]
pub(crate) enum SettingsError {
    #[error("error reading settings '{}': {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("error parsing settings '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid trusted header name '{0}'")]
    InvalidHeader(String),

    #[error("negotiation token '{0}' is not valid base64")]
    InvalidToken(String),

    #[error("invalid [ldap] settings: {0}")]
    Ldap(#[from] ldap::SettingsError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Settings {
    pub spnego: SpnegoSettings,
    pub trusted: TrustedSettings,
    /// Username to password, for form logins.
    pub users: BTreeMap<String, String>,
    pub views: ViewSettings,
    /// Search-then-bind form authentication; off unless present.
    pub ldap: Option<LdapSettings>,
    /// Entries served to the `[ldap]` handler.
    pub directory: Vec<DirectoryEntrySettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DirectoryEntrySettings {
    pub dn: String,
    pub password: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct SpnegoSettings {
    pub ntlm: bool,
    /// Base64 token to principal id.
    pub tokens: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct TrustedSettings {
    pub header: String,
}

impl Default for TrustedSettings {
    fn default() -> Self {
        TrustedSettings {
            header: "x-remote-user".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ViewSettings {
    /// Reject view ids without a template entry.
    pub strict: bool,
    pub templates: BTreeMap<String, String>,
}

impl Settings {
    /// Read `path`, or fall back to defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Settings, SettingsError> {
        let Some(path) = path else {
            return Ok(Settings::default());
        };
        let source = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&source).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn trusted_header(&self) -> Result<HeaderName, SettingsError> {
        HeaderName::from_bytes(self.trusted.header.trim().as_bytes())
            .map_err(|_| SettingsError::InvalidHeader(self.trusted.header.clone()))
    }

    pub fn negotiator(&self) -> Result<StaticNegotiator, SettingsError> {
        let mut negotiator = StaticNegotiator::new();
        for (token, principal) in &self.spnego.tokens {
            let decoded =
                decode_token(token).ok_or_else(|| SettingsError::InvalidToken(token.clone()))?;
            negotiator = negotiator.with_token(
                decoded,
                Negotiation {
                    principal: Some(Principal::new(principal.clone())),
                    next_token: None,
                },
            );
        }
        Ok(negotiator)
    }

    pub fn directory_handler(
        &self,
    ) -> Result<Option<DirectoryBindHandler<StaticDirectory>>, SettingsError> {
        let Some(ldap_settings) = &self.ldap else {
            return Ok(None);
        };
        let directory = self.directory.iter().fold(StaticDirectory::new(), |dir, entry| {
            let record = entry
                .attributes
                .iter()
                .fold(DirectoryEntry::new(entry.dn.clone()), |record, (name, value)| {
                    record.with_attribute(name.clone(), value.clone())
                });
            dir.with_entry(record, entry.password.clone())
        });
        Ok(Some(DirectoryBindHandler::new(directory, ldap_settings.clone())?))
    }

    pub fn view_factory(&self) -> TemplateViewFactory {
        let base = if self.views.strict {
            TemplateViewFactory::strict()
        } else {
            TemplateViewFactory::permissive()
        };
        self.views
            .templates
            .iter()
            .fold(base, |factory, (id, template)| factory.with_template(id, template))
    }
}
