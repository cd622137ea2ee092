//! The state model: four state kinds sharing id, entry/exit actions and
//! transitions.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::action::ActionRef;
use crate::mapping::SubflowAttributeMapper;
use crate::transition::{Transition, TransitionDef};
use crate::view::View;

/// Handle of a state inside its owning flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateIdx(pub(crate) usize);

impl StateIdx {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StateIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How an action state with several actions picks its outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionChainPolicy {
    /// Stop at the first action whose event matches a transition.
    #[default]
    FirstMatch,
    /// Run every action; the last event decides.
    LastResult,
}

#[derive(Debug, Clone)]
pub enum StateKind {
    Action {
        actions: Vec<ActionRef>,
        policy: ActionChainPolicy,
    },
    View {
        view: Arc<dyn View>,
    },
    Subflow {
        subflow_id: String,
        mapper: Option<SubflowAttributeMapper>,
    },
    End {
        final_response: Option<ActionRef>,
    },
}

impl StateKind {
    pub fn label(&self) -> &'static str {
        match self {
            StateKind::Action { .. } => "action",
            StateKind::View { .. } => "view",
            StateKind::Subflow { .. } => "subflow",
            StateKind::End { .. } => "end",
        }
    }
}

// ──────────────────────────────────────────────
// Draft
// ──────────────────────────────────────────────

/// A state while its flow is being assembled.
#[derive(Debug, Clone)]
pub struct StateDef {
    pub id: String,
    pub kind: StateKind,
    pub entry_actions: Vec<ActionRef>,
    pub exit_actions: Vec<ActionRef>,
    pub transitions: Vec<TransitionDef>,
}

impl StateDef {
    pub fn new(id: impl Into<String>, kind: StateKind) -> Self {
        StateDef {
            id: id.into(),
            kind,
            entry_actions: Vec::new(),
            exit_actions: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self.kind, StateKind::End { .. })
    }
}

// ──────────────────────────────────────────────
// Resolved
// ──────────────────────────────────────────────

#[derive(Debug)]
pub struct State {
    id: String,
    idx: StateIdx,
    kind: StateKind,
    entry_actions: Vec<ActionRef>,
    exit_actions: Vec<ActionRef>,
    transitions: Vec<Transition>,
}

impl State {
    pub(crate) fn new(def: StateDef, idx: StateIdx, transitions: Vec<Transition>) -> Self {
        State {
            id: def.id,
            idx,
            kind: def.kind,
            entry_actions: def.entry_actions,
            exit_actions: def.exit_actions,
            transitions,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn idx(&self) -> StateIdx {
        self.idx
    }

    pub fn kind(&self) -> &StateKind {
        &self.kind
    }

    pub fn entry_actions(&self) -> &[ActionRef] {
        &self.entry_actions
    }

    pub fn exit_actions(&self) -> &[ActionRef] {
        &self.exit_actions
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn is_end(&self) -> bool {
        matches!(self.kind, StateKind::End { .. })
    }
}
