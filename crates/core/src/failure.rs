//! Failure kinds raised by actions, and the kind hierarchy exception
//! handlers are matched against.
//!
//! The hierarchy is closed: every kind has at most one parent and `Any`
//! is the root. A handler registered for a kind catches that kind and every
//! kind below it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::convert::ConversionError;

/// A failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Any,
    Authentication,
    BadCredentials,
    AccountDisabled,
    AccountLocked,
    PasswordExpired,
    UnresolvedPrincipal,
    Negotiation,
    Ticket,
    Directory,
    NoMatchingTransition,
    Internal,
}

impl FailureKind {
    pub const ALL: [FailureKind; 12] = [
        FailureKind::Any,
        FailureKind::Authentication,
        FailureKind::BadCredentials,
        FailureKind::AccountDisabled,
        FailureKind::AccountLocked,
        FailureKind::PasswordExpired,
        FailureKind::UnresolvedPrincipal,
        FailureKind::Negotiation,
        FailureKind::Ticket,
        FailureKind::Directory,
        FailureKind::NoMatchingTransition,
        FailureKind::Internal,
    ];

    /// The immediate parent kind, `None` for the root.
    pub fn parent(self) -> Option<FailureKind> {
        match self {
            FailureKind::Any => None,
            FailureKind::Authentication
            | FailureKind::Ticket
            | FailureKind::Directory
            | FailureKind::NoMatchingTransition
            | FailureKind::Internal => Some(FailureKind::Any),
            FailureKind::BadCredentials
            | FailureKind::AccountDisabled
            | FailureKind::AccountLocked
            | FailureKind::PasswordExpired
            | FailureKind::UnresolvedPrincipal
            | FailureKind::Negotiation => Some(FailureKind::Authentication),
        }
    }

    /// This kind followed by each ancestor up to `Any`.
    pub fn ancestry(self) -> impl Iterator<Item = FailureKind> {
        std::iter::successors(Some(self), |kind| kind.parent())
    }

    /// True if `self` is `other` or descends from it.
    pub fn is_a(self, other: FailureKind) -> bool {
        self.ancestry().any(|kind| kind == other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Any => "any",
            FailureKind::Authentication => "authentication",
            FailureKind::BadCredentials => "bad_credentials",
            FailureKind::AccountDisabled => "account_disabled",
            FailureKind::AccountLocked => "account_locked",
            FailureKind::PasswordExpired => "password_expired",
            FailureKind::UnresolvedPrincipal => "unresolved_principal",
            FailureKind::Negotiation => "negotiation",
            FailureKind::Ticket => "ticket",
            FailureKind::Directory => "directory",
            FailureKind::NoMatchingTransition => "no_matching_transition",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FailureKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ConversionError::UnknownFailureKind(s.to_string()))
    }
}

// ──────────────────────────────────────────────
// ActionError
// ──────────────────────────────────────────────

/// A failure raised by an action while a flow is executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionError {
    kind: FailureKind,
    message: String,
}

impl ActionError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        ActionError {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ActionError::new(FailureKind::Internal, message)
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// JSON form placed in flash scope so views can show the failure.
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind.as_str(),
            "message": self.message,
        })
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.message)
    }
}

impl std::error::Error for ActionError {}
