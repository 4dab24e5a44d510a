//! Issue status state machine.
//!
//! The transition graph is fixed data: each [`Transition`] names its source,
//! target and guards. [`WorkflowEngine`] holds only that table and its
//! [`WorkflowMode`]; it never reads the store. Callers gather [`GuardFacts`]
//! first and ask [`WorkflowEngine::validate`] for a verdict.
//!
//! | Mode | Guards run | Failing guard |
//! |---|---|---|
//! | liberal | no | n/a |
//! | advisory | yes | warning, transition allowed |
//! | strict | yes | transition rejected (advisory-only guards still warn) |

pub mod guards;

use crate::error::TdError;
use crate::model::{Issue, Status};
use guards::{
    BlockedGuard, DependencyGuard, DifferentReviewerGuard, EpicChildrenGuard, Guard, GuardKind,
    GuardVerdict, HandoffRequiredGuard,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

pub use guards::GuardFacts;

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// How guard failures are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowMode {
    Liberal,
    Advisory,
    #[default]
    Strict,
}

impl WorkflowMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Liberal => "liberal",
            Self::Advisory => "advisory",
            Self::Strict => "strict",
        }
    }
}

impl fmt::Display for WorkflowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowMode {
    type Err = TdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "liberal" | "off" => Ok(Self::Liberal),
            "advisory" | "warn" => Ok(Self::Advisory),
            "strict" => Ok(Self::Strict),
            other => Err(TdError::invalid(format!(
                "unknown workflow mode '{other}': expected liberal, advisory or strict"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Transitions as data
// ---------------------------------------------------------------------------

/// Everything a guard can look at.
#[derive(Debug, Clone, Copy)]
pub struct TransitionRequest<'a> {
    pub issue: &'a Issue,
    pub to: Status,
    pub session_id: &'a str,
    pub force: bool,
    pub admin: bool,
    pub facts: &'a GuardFacts,
}

/// One edge of the status graph.
pub struct Transition {
    pub from: Status,
    pub to: Status,
    pub guards: Vec<Box<dyn Guard>>,
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("to", &self.to)
            .field(
                "guards",
                &self.guards.iter().map(|g| g.kind().name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn edge(from: Status, to: Status, guards: Vec<Box<dyn Guard>>) -> Transition {
    Transition { from, to, guards }
}

/// The default registration list.
#[must_use]
pub fn default_transitions() -> Vec<Transition> {
    use Status::{Blocked, Closed, InProgress, InReview, Open};

    let closing = || -> Vec<Box<dyn Guard>> {
        vec![Box::new(EpicChildrenGuard), Box::new(DependencyGuard)]
    };

    vec![
        edge(Open, InProgress, vec![Box::new(DependencyGuard)]),
        edge(Open, Blocked, vec![]),
        edge(Open, InReview, vec![]),
        edge(Open, Closed, closing()),
        edge(InProgress, Open, vec![]),
        edge(InProgress, Blocked, vec![]),
        edge(InProgress, InReview, vec![Box::new(HandoffRequiredGuard)]),
        edge(InProgress, Closed, closing()),
        edge(Blocked, Open, vec![]),
        edge(
            Blocked,
            InProgress,
            vec![Box::new(BlockedGuard), Box::new(DependencyGuard)],
        ),
        edge(Blocked, Closed, closing()),
        edge(InReview, Open, vec![]),
        edge(InReview, InProgress, vec![]),
        edge(
            InReview,
            Closed,
            vec![
                Box::new(DifferentReviewerGuard),
                Box::new(EpicChildrenGuard),
                Box::new(DependencyGuard),
            ],
        ),
        edge(Closed, Open, vec![]),
    ]
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Result of a permitted transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    /// Messages from guards that failed without blocking.
    pub warnings: Vec<String>,
}

/// Pure transition validator.
#[derive(Debug)]
pub struct WorkflowEngine {
    mode: WorkflowMode,
    transitions: Vec<Transition>,
}

impl WorkflowEngine {
    #[must_use]
    pub fn new(mode: WorkflowMode) -> Self {
        Self {
            mode,
            transitions: default_transitions(),
        }
    }

    #[must_use]
    pub const fn mode(&self) -> WorkflowMode {
        self.mode
    }

    #[must_use]
    pub fn transition(&self, from: Status, to: Status) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.to == to)
    }

    #[must_use]
    pub fn is_allowed(&self, from: Status, to: Status) -> bool {
        self.transition(from, to).is_some()
    }

    /// Statuses reachable from `from` in one step.
    #[must_use]
    pub fn targets(&self, from: Status) -> Vec<Status> {
        self.transitions
            .iter()
            .filter(|t| t.from == from)
            .map(|t| t.to)
            .collect()
    }

    /// Run the guards for `req` under the engine's mode.
    ///
    /// # Errors
    ///
    /// - `invalid_input` when the graph has no such edge
    /// - `cannot_self_approve` / `handoff_required` when that guard alone
    ///   blocks the transition
    /// - `validation_error` listing every blocking guard message otherwise
    pub fn validate(&self, req: &TransitionRequest<'_>) -> Result<Validation, TdError> {
        let from = req.issue.status;
        let Some(transition) = self.transition(from, req.to) else {
            return Err(TdError::invalid(format!(
                "invalid transition for {}: {from} -> {}",
                req.issue.id, req.to
            )));
        };
        if self.mode == WorkflowMode::Liberal {
            return Ok(Validation::default());
        }

        let verdicts: Vec<GuardVerdict> = transition
            .guards
            .iter()
            .map(|g| g.verdict(req))
            .filter(|v| !v.passed)
            .collect();

        let (blocking, advisory): (Vec<_>, Vec<_>) = verdicts
            .into_iter()
            .partition(|v| self.mode == WorkflowMode::Strict && !v.advisory_only);

        if blocking.is_empty() {
            return Ok(Validation {
                warnings: advisory.into_iter().map(|v| v.message).collect(),
            });
        }

        if let [only] = blocking.as_slice() {
            match only.kind {
                GuardKind::DifferentReviewer => {
                    return Err(TdError::CannotSelfApprove {
                        id: req.issue.id.clone(),
                        session: req.session_id.to_string(),
                    });
                }
                GuardKind::HandoffRequired => {
                    return Err(TdError::HandoffRequired {
                        id: req.issue.id.clone(),
                    });
                }
                _ => {}
            }
        }
        Err(TdError::Validation(
            blocking.into_iter().map(|v| v.message).collect(),
        ))
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new(WorkflowMode::default())
    }
}
