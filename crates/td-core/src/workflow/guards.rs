//! Transition guards.
//!
//! A guard inspects a [`TransitionRequest`] and either passes or fails with a
//! message naming itself. Guards never touch the store: everything they need
//! is gathered up front into [`GuardFacts`].

use super::TransitionRequest;
use crate::model::{IssueType, Status};

/// Which guard produced a verdict. Used to map failures onto error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardKind {
    Blocked,
    DifferentReviewer,
    HandoffRequired,
    EpicChildren,
    Dependency,
}

impl GuardKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Blocked => "BlockedGuard",
            Self::DifferentReviewer => "DifferentReviewerGuard",
            Self::HandoffRequired => "HandoffRequiredGuard",
            Self::EpicChildren => "EpicChildrenGuard",
            Self::Dependency => "DependencyGuard",
        }
    }
}

/// Store-derived facts a guard may consult.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardFacts {
    /// At least one handoff exists for the issue.
    pub has_handoff: bool,
    /// The acting session took part in implementation (implementer or
    /// session history).
    pub session_involved: bool,
    /// Descendants that are not closed.
    pub open_descendants: Vec<String>,
    /// Blockers that are not closed.
    pub open_blockers: Vec<String>,
}

/// Outcome of one guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardVerdict {
    pub kind: GuardKind,
    pub passed: bool,
    pub message: String,
    /// Failures of advisory-only guards never block, even in strict mode.
    pub advisory_only: bool,
}

/// A predicate attached to a transition.
pub trait Guard: Send + Sync {
    fn kind(&self) -> GuardKind;

    /// Whether a failure is only ever a warning.
    fn advisory_only(&self) -> bool {
        false
    }

    /// Returns `Err(message)` when the transition must not proceed.
    ///
    /// # Errors
    ///
    /// The error string explains the failure and names the guard.
    fn check(&self, req: &TransitionRequest<'_>) -> Result<(), String>;

    fn verdict(&self, req: &TransitionRequest<'_>) -> GuardVerdict {
        let (passed, message) = match self.check(req) {
            Ok(()) => (true, String::new()),
            Err(message) => (false, format!("{}: {message}", self.kind().name())),
        };
        GuardVerdict {
            kind: self.kind(),
            passed,
            message,
            advisory_only: self.advisory_only(),
        }
    }
}

/// Leaving `blocked` for work requires `--force`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockedGuard;

impl Guard for BlockedGuard {
    fn kind(&self) -> GuardKind {
        GuardKind::Blocked
    }

    fn check(&self, req: &TransitionRequest<'_>) -> Result<(), String> {
        if req.issue.status == Status::Blocked && !req.force {
            return Err(format!(
                "{} is blocked; unblock it first or pass --force",
                req.issue.id
            ));
        }
        Ok(())
    }
}

/// The approving session must not have implemented the issue.
#[derive(Debug, Clone, Copy, Default)]
pub struct DifferentReviewerGuard;

impl Guard for DifferentReviewerGuard {
    fn kind(&self) -> GuardKind {
        GuardKind::DifferentReviewer
    }

    fn check(&self, req: &TransitionRequest<'_>) -> Result<(), String> {
        if req.issue.minor || req.admin {
            return Ok(());
        }
        let implementer = req.issue.implementer_session.as_deref() == Some(req.session_id);
        if implementer || req.facts.session_involved {
            return Err(format!(
                "session {} was involved in implementing {}; a different session must approve",
                req.session_id, req.issue.id
            ));
        }
        Ok(())
    }
}

/// Submitting work for review requires a recorded handoff.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandoffRequiredGuard;

impl Guard for HandoffRequiredGuard {
    fn kind(&self) -> GuardKind {
        GuardKind::HandoffRequired
    }

    fn check(&self, req: &TransitionRequest<'_>) -> Result<(), String> {
        if req.facts.has_handoff {
            Ok(())
        } else {
            Err(format!("{} has no handoff recorded", req.issue.id))
        }
    }
}

/// An epic closes only once every descendant is closed.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpicChildrenGuard;

impl Guard for EpicChildrenGuard {
    fn kind(&self) -> GuardKind {
        GuardKind::EpicChildren
    }

    fn check(&self, req: &TransitionRequest<'_>) -> Result<(), String> {
        if req.issue.issue_type != IssueType::Epic || req.facts.open_descendants.is_empty() {
            return Ok(());
        }
        Err(format!(
            "epic {} has {} open descendant(s): {}",
            req.issue.id,
            req.facts.open_descendants.len(),
            req.facts.open_descendants.join(", ")
        ))
    }
}

/// Unresolved blockers. Advisory only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyGuard;

impl Guard for DependencyGuard {
    fn kind(&self) -> GuardKind {
        GuardKind::Dependency
    }

    fn advisory_only(&self) -> bool {
        true
    }

    fn check(&self, req: &TransitionRequest<'_>) -> Result<(), String> {
        if req.facts.open_blockers.is_empty() {
            return Ok(());
        }
        Err(format!(
            "{} has unresolved dependencies: {}",
            req.issue.id,
            req.facts.open_blockers.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Issue;
    use crate::time;

    fn request<'a>(
        issue: &'a Issue,
        facts: &'a GuardFacts,
        session: &'a str,
    ) -> TransitionRequest<'a> {
        TransitionRequest {
            issue,
            to: Status::Closed,
            session_id: session,
            force: false,
            admin: false,
            facts,
        }
    }

    #[test]
    fn different_reviewer_blocks_implementer() {
        let mut issue = Issue::new("td-a1b2", "x", time::now());
        issue.status = Status::InReview;
        issue.implementer_session = Some("A".into());
        let facts = GuardFacts::default();

        let verdict = DifferentReviewerGuard.verdict(&request(&issue, &facts, "A"));
        assert!(!verdict.passed);
        assert!(verdict.message.starts_with("DifferentReviewerGuard"));
        assert!(DifferentReviewerGuard.verdict(&request(&issue, &facts, "B")).passed);

        issue.minor = true;
        assert!(DifferentReviewerGuard.verdict(&request(&issue, &facts, "A")).passed);
    }

    #[test]
    fn different_reviewer_uses_session_history() {
        let issue = Issue::new("td-a1b2", "x", time::now());
        let facts = GuardFacts {
            session_involved: true,
            ..GuardFacts::default()
        };
        assert!(!DifferentReviewerGuard.verdict(&request(&issue, &facts, "C")).passed);
        let mut admin = request(&issue, &facts, "C");
        admin.admin = true;
        assert!(DifferentReviewerGuard.verdict(&admin).passed);
    }

    #[test]
    fn epic_guard_ignores_non_epics() {
        let mut issue = Issue::new("td-e", "epic", time::now());
        let facts = GuardFacts {
            open_descendants: vec!["td-c".into()],
            ..GuardFacts::default()
        };
        assert!(EpicChildrenGuard.verdict(&request(&issue, &facts, "A")).passed);
        issue.issue_type = IssueType::Epic;
        let verdict = EpicChildrenGuard.verdict(&request(&issue, &facts, "A"));
        assert!(!verdict.passed);
        assert!(verdict.message.contains("td-c"));
    }

    #[test]
    fn dependency_guard_is_advisory() {
        let issue = Issue::new("td-x", "x", time::now());
        let facts = GuardFacts {
            open_blockers: vec!["td-y".into()],
            ..GuardFacts::default()
        };
        let verdict = DependencyGuard.verdict(&request(&issue, &facts, "A"));
        assert!(!verdict.passed);
        assert!(verdict.advisory_only);
    }
}
