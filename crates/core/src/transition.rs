//! Transitions and exception handlers.
//!
//! Each comes in two forms: a draft whose target is a state id string
//! (forward references are fine while a flow is being assembled), and a
//! resolved form whose target is a `StateIdx` into the owning flow.

use std::fmt;

use crate::action::Event;
use crate::failure::FailureKind;
use crate::state::StateIdx;

/// The wildcard outcome; equivalent to omitting the outcome.
pub const WILDCARD: &str = "*";

/// When a transition fires.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransitionCriteria {
    Always,
    OnEvent(String),
}

impl TransitionCriteria {
    /// `None` and `"*"` match every event.
    pub fn from_outcome(outcome: Option<&str>) -> Self {
        match outcome.map(str::trim) {
            None | Some("") | Some(WILDCARD) => TransitionCriteria::Always,
            Some(event) => TransitionCriteria::OnEvent(event.to_string()),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        match self {
            TransitionCriteria::Always => true,
            TransitionCriteria::OnEvent(id) => event.is(id),
        }
    }

    pub fn outcome(&self) -> Option<&str> {
        match self {
            TransitionCriteria::Always => None,
            TransitionCriteria::OnEvent(id) => Some(id),
        }
    }
}

impl fmt::Display for TransitionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.outcome().unwrap_or(WILDCARD))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionDef {
    pub criteria: TransitionCriteria,
    pub target: String,
}

impl TransitionDef {
    pub fn new(outcome: Option<&str>, target: impl Into<String>) -> Self {
        TransitionDef {
            criteria: TransitionCriteria::from_outcome(outcome),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    criteria: TransitionCriteria,
    target: StateIdx,
}

impl Transition {
    pub(crate) fn new(criteria: TransitionCriteria, target: StateIdx) -> Self {
        Transition { criteria, target }
    }

    pub fn criteria(&self) -> &TransitionCriteria {
        &self.criteria
    }

    pub fn target(&self) -> StateIdx {
        self.target
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.criteria.matches(event)
    }
}

// ──────────────────────────────────────────────
// Exception handlers
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandlerDef {
    pub kind: FailureKind,
    pub target: String,
}

/// Routes failures of `kind` (or any kind below it) to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    kind: FailureKind,
    target: StateIdx,
}

impl ExceptionHandler {
    pub(crate) fn new(kind: FailureKind, target: StateIdx) -> Self {
        ExceptionHandler { kind, target }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn target(&self) -> StateIdx {
        self.target
    }

    pub fn handles(&self, failure: FailureKind) -> bool {
        failure.is_a(self.kind)
    }
}
