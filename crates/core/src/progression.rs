//! Milestone Progression Engine
//!
//! Turns an oracle judgment plus the previous session state into the next
//! authoritative state. The oracle is non-deterministic and occasionally
//! contradicts itself, so the engine only lets a judgment complete the
//! milestone that is actually active, and re-checks its own invariants after
//! every update:
//!
//! - `milestones_completed` never shrinks between turns.
//! - `current_milestone` is never a completed milestone and always has its
//!   prerequisites satisfied.
//! - Once every milestone is completed, `current_milestone` is `None`.
//!
//! Violations are repaired in place and reported as [`InvariantViolation`]s;
//! they are never surfaced to the student.

use crate::composer::GENERIC_APOLOGY;
use crate::curriculum::{Curriculum, MilestoneId};
use crate::oracle::Judgment;
use crate::session::SessionState;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How the engine treated the oracle's completion claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The active milestone was completed.
    Accepted {
        completed: MilestoneId,
        next: Option<MilestoneId>,
    },
    /// The oracle made no claim.
    NoClaim,
    /// The claim named something other than the active, incomplete milestone.
    Rejected { claim: MilestoneId },
}

/// An internal consistency failure that the engine repaired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// The candidate completed set dropped milestones; the previous set was
    /// restored.
    CompletedSetShrank {
        before: usize,
        after: usize,
        lost: Vec<MilestoneId>,
    },
    /// The active milestone was already completed.
    ActiveMilestoneCompleted {
        milestone: MilestoneId,
        reassigned: Option<MilestoneId>,
    },
    /// The active milestone had unmet prerequisites.
    ActiveMilestoneLocked {
        milestone: MilestoneId,
        reassigned: Option<MilestoneId>,
    },
    /// The active milestone is not part of the curriculum.
    UnknownActiveMilestone {
        milestone: MilestoneId,
        reassigned: Option<MilestoneId>,
    },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::CompletedSetShrank { before, after, lost } => write!(
                f,
                "completed set shrank from {before} to {after} (lost {lost:?})"
            ),
            InvariantViolation::ActiveMilestoneCompleted {
                milestone,
                reassigned,
            } => write!(
                f,
                "active milestone '{milestone}' was already completed; reassigned to {reassigned:?}"
            ),
            InvariantViolation::ActiveMilestoneLocked {
                milestone,
                reassigned,
            } => write!(
                f,
                "active milestone '{milestone}' has unmet prerequisites; reassigned to {reassigned:?}"
            ),
            InvariantViolation::UnknownActiveMilestone {
                milestone,
                reassigned,
            } => write!(
                f,
                "active milestone '{milestone}' is not in the curriculum; reassigned to {reassigned:?}"
            ),
        }
    }
}

/// Result of one [`ProgressionEngine::advance`] call.
#[derive(Debug, Clone)]
pub struct Advance {
    pub state: SessionState,
    pub outcome: ClaimOutcome,
    pub violations: Vec<InvariantViolation>,
}

impl Advance {
    pub fn just_completed(&self) -> Option<&str> {
        match &self.outcome {
            ClaimOutcome::Accepted { completed, .. } => Some(completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressionEngine {
    curriculum: Arc<Curriculum>,
}

impl ProgressionEngine {
    pub fn new(curriculum: Arc<Curriculum>) -> Self {
        Self { curriculum }
    }

    pub fn curriculum(&self) -> &Arc<Curriculum> {
        &self.curriculum
    }

    /// Applies one judgment to `state`.
    ///
    /// The user message is appended first and unconditionally. A completion
    /// claim is accepted only when it names the active milestone and that
    /// milestone is a known, unlocked and not yet completed id. Every
    /// other claim is dropped without error and the judgment's feedback is kept
    /// for the next reply.
    pub fn advance(&self, state: SessionState, judgment: &Judgment, message: &str) -> Advance {
        let previous_completed = state.milestones_completed.clone();
        let mut next = state;
        let mut violations = Vec::new();

        next.push_user(message);
        next.just_completed = None;

        if next.current_milestone.is_none() {
            self.bootstrap(&mut next);
        }

        next.milestones_identified.extend(
            judgment
                .milestones_identified
                .iter()
                .filter(|id| self.curriculum.contains(id))
                .cloned(),
        );

        let outcome = match judgment.milestone_completed.as_deref() {
            None => {
                next.pending_feedback = non_empty(judgment.feedback.as_deref());
                ClaimOutcome::NoClaim
            }
            Some(claim) if self.admits(&next, claim) => {
                next.milestones_completed.insert(claim.to_string());
                let following = self
                    .curriculum
                    .next_available_after(claim, &next.milestones_completed)
                    .map(|m| m.id.clone());
                info!(completed = %claim, next = ?following, "Milestone completed");
                next.current_milestone = following.clone();
                next.pending_feedback = None;
                next.just_completed = Some(claim.to_string());
                ClaimOutcome::Accepted {
                    completed: claim.to_string(),
                    next: following,
                }
            }
            Some(claim) => {
                debug!(
                    claim,
                    current = ?next.current_milestone,
                    "Rejected completion claim for a milestone that is not active"
                );
                next.pending_feedback = non_empty(judgment.feedback.as_deref());
                ClaimOutcome::Rejected {
                    claim: claim.to_string(),
                }
            }
        };

        if let Some(violation) =
            enforce_monotonic(&previous_completed, &mut next.milestones_completed)
        {
            warn!(%violation, "Repaired progression invariant");
            violations.push(violation);
        }

        if let Some(violation) = repair_active(&self.curriculum, &mut next) {
            warn!(%violation, "Repaired progression invariant");
            violations.push(violation);
        }

        if next.is_curriculum_complete(&self.curriculum) {
            next.current_milestone = None;
        }

        Advance {
            state: next,
            outcome,
            violations,
        }
    }

    /// Fail-safe path for a turn whose oracle call failed: records the
    /// exchange in the transcript and leaves all progression fields alone.
    pub fn record_oracle_failure(&self, mut state: SessionState, message: &str) -> SessionState {
        state.push_user(message);
        state.push_assistant(GENERIC_APOLOGY);
        state
    }

    /// Selects the first unlocked, incomplete milestone in canonical order.
    pub fn bootstrap(&self, state: &mut SessionState) {
        state.current_milestone = self
            .curriculum
            .first_available(&state.milestones_completed)
            .map(|m| m.id.clone());
        debug!(current = ?state.current_milestone, "Bootstrapped active milestone");
    }

    fn admits(&self, state: &SessionState, claim: &str) -> bool {
        state.current_milestone.as_deref() == Some(claim)
            && !state.milestones_completed.contains(claim)
            && self
                .curriculum
                .get(claim)
                .is_some_and(|m| m.is_unlocked(&state.milestones_completed))
    }
}

/// Restores `previous` if `candidate` lost any of its members.
pub fn enforce_monotonic(
    previous: &BTreeSet<MilestoneId>,
    candidate: &mut BTreeSet<MilestoneId>,
) -> Option<InvariantViolation> {
    if previous.is_subset(candidate) {
        return None;
    }
    let violation = InvariantViolation::CompletedSetShrank {
        before: previous.len(),
        after: candidate.len(),
        lost: previous.difference(candidate).cloned().collect(),
    };
    *candidate = previous.clone();
    Some(violation)
}

/// Reassigns `current_milestone` when it is completed, locked, or unknown.
pub fn repair_active(
    curriculum: &Curriculum,
    state: &mut SessionState,
) -> Option<InvariantViolation> {
    let current = state.current_milestone.clone()?;
    let completed = &state.milestones_completed;

    let make_violation: fn(MilestoneId, Option<MilestoneId>) -> InvariantViolation =
        match curriculum.get(&current) {
            None => |milestone, reassigned| InvariantViolation::UnknownActiveMilestone {
                milestone,
                reassigned,
            },
            Some(_) if completed.contains(&current) => {
                |milestone, reassigned| InvariantViolation::ActiveMilestoneCompleted {
                    milestone,
                    reassigned,
                }
            }
            Some(m) if !m.is_unlocked(completed) => {
                |milestone, reassigned| InvariantViolation::ActiveMilestoneLocked {
                    milestone,
                    reassigned,
                }
            }
            Some(_) => return None,
        };

    let reassigned = curriculum
        .first_available(completed)
        .map(|m| m.id.clone());
    state.current_milestone = reassigned.clone();
    Some(make_violation(current, reassigned))
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::Milestone;

    fn set(ids: &[&str]) -> BTreeSet<MilestoneId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn three_step() -> Arc<Curriculum> {
        Arc::new(
            Curriculum::new(
                "three",
                "",
                vec![
                    Milestone::new("m1", "One", "", &[]),
                    Milestone::new("m2", "Two", "", &["m1"]),
                    Milestone::new("m3", "Three", "", &["m1", "m2"]),
                ],
            )
            .unwrap(),
        )
    }

    fn state_at(curriculum: &Curriculum, current: Option<&str>, completed: &[&str]) -> SessionState {
        let mut state = SessionState::new("s", curriculum, false, "");
        state.current_milestone = current.map(str::to_string);
        state.milestones_completed = set(completed);
        state
    }

    #[test]
    fn test_bootstrap_selects_first_unlocked() {
        let curriculum = three_step();
        let engine = ProgressionEngine::new(curriculum.clone());
        let state = state_at(&curriculum, None, &[]);

        let advance = engine.advance(state, &Judgment::no_claim("hi"), "hello");

        assert_eq!(advance.state.current_milestone.as_deref(), Some("m1"));
        assert_eq!(advance.outcome, ClaimOutcome::NoClaim);
        assert!(advance.violations.is_empty());
    }

    #[test]
    fn test_accepts_claim_for_active_milestone() {
        let curriculum = three_step();
        let engine = ProgressionEngine::new(curriculum.clone());
        let state = state_at(&curriculum, Some("m1"), &[]);

        let advance = engine.advance(state, &Judgment::claiming("m1", "nice"), "here is my board");

        assert_eq!(advance.state.milestones_completed, set(&["m1"]));
        assert_eq!(advance.state.current_milestone.as_deref(), Some("m2"));
        assert_eq!(advance.state.just_completed.as_deref(), Some("m1"));
        assert_eq!(advance.just_completed(), Some("m1"));
        assert_eq!(
            advance.outcome,
            ClaimOutcome::Accepted {
                completed: "m1".to_string(),
                next: Some("m2".to_string())
            }
        );
        assert_eq!(advance.state.transcript.last().unwrap().content, "here is my board");
    }

    #[test]
    fn test_rejects_claim_for_later_milestone() {
        let curriculum = three_step();
        let engine = ProgressionEngine::new(curriculum.clone());
        let state = state_at(&curriculum, Some("m2"), &["m1"]);
        let before = state.clone();

        let advance = engine.advance(state, &Judgment::claiming("m3", "wow"), "done with m3");

        assert_eq!(advance.state.current_milestone, before.current_milestone);
        assert_eq!(advance.state.milestones_completed, before.milestones_completed);
        assert_eq!(advance.state.transcript.len(), before.transcript.len() + 1);
        assert_eq!(
            advance.outcome,
            ClaimOutcome::Rejected {
                claim: "m3".to_string()
            }
        );
    }

    #[test]
    fn test_rejects_claim_for_already_completed_milestone() {
        let curriculum = three_step();
        let engine = ProgressionEngine::new(curriculum.clone());
        let state = state_at(&curriculum, Some("m2"), &["m1"]);

        let advance = engine.advance(state, &Judgment::claiming("m1", ""), "again");

        assert_eq!(advance.state.milestones_completed, set(&["m1"]));
        assert_eq!(advance.state.current_milestone.as_deref(), Some("m2"));
        assert!(matches!(advance.outcome, ClaimOutcome::Rejected { .. }));
    }

    #[test]
    fn test_rejects_unknown_claim() {
        let curriculum = three_step();
        let engine = ProgressionEngine::new(curriculum.clone());
        let state = state_at(&curriculum, Some("m1"), &[]);

        let advance = engine.advance(state, &Judgment::claiming("true", ""), "done");

        assert!(advance.state.milestones_completed.is_empty());
        assert_eq!(advance.state.current_milestone.as_deref(), Some("m1"));
    }

    #[test]
    fn test_rejects_claim_for_locked_active_milestone() {
        let curriculum = three_step();
        let engine = ProgressionEngine::new(curriculum.clone());
        let state = state_at(&curriculum, Some("m3"), &[]);

        let advance = engine.advance(state, &Judgment::claiming("m3", ""), "skipped ahead");

        assert!(advance.state.milestones_completed.is_empty());
        assert!(matches!(advance.outcome, ClaimOutcome::Rejected { .. }));
        assert_eq!(advance.state.current_milestone.as_deref(), Some("m1"));
    }

    #[test]
    fn test_rejection_keeps_feedback() {
        let curriculum = three_step();
        let engine = ProgressionEngine::new(curriculum.clone());
        let state = state_at(&curriculum, Some("m1"), &[]);

        let judgment = Judgment::no_claim("keep going").with_feedback("display is missing");
        let advance = engine.advance(state, &judgment, "partial board");

        assert_eq!(advance.state.pending_feedback.as_deref(), Some("display is missing"));

        let blank = Judgment::no_claim("ok").with_feedback("   ");
        let advance = engine.advance(advance.state, &blank, "more");
        assert_eq!(advance.state.pending_feedback, None);
    }

    #[test]
    fn test_acceptance_clears_feedback() {
        let curriculum = three_step();
        let engine = ProgressionEngine::new(curriculum.clone());
        let mut state = state_at(&curriculum, Some("m1"), &[]);
        state.pending_feedback = Some("old".to_string());

        let judgment = Judgment::claiming("m1", "yay").with_feedback("great work");
        let advance = engine.advance(state, &judgment, "final board");

        assert_eq!(advance.state.pending_feedback, None);
    }

    #[test]
    fn test_idempotent_rejection() {
        let curriculum = three_step();
        let engine = ProgressionEngine::new(curriculum.clone());
        let state = state_at(&curriculum, Some("m2"), &["m1"]);

        let first = engine.advance(state.clone(), &Judgment::no_claim("a"), "one");
        let second = engine.advance(first.state.clone(), &Judgment::no_claim("b"), "two");

        for advanced in [&first.state, &second.state] {
            assert_eq!(advanced.current_milestone, state.current_milestone);
            assert_eq!(advanced.milestones_completed, state.milestones_completed);
        }
    }

    #[test]
    fn test_terminal_state_after_last_milestone() {
        let curriculum = Arc::new(Curriculum::tic_tac_toe());
        let engine = ProgressionEngine::new(curriculum.clone());
        let state = state_at(&curriculum, Some("m4"), &["m1", "m2", "m3"]);

        let advance = engine.advance(state, &Judgment::claiming("m4", "done"), "game loop");

        assert_eq!(advance.state.current_milestone, None);
        assert_eq!(advance.state.milestones_completed, set(&["m1", "m2", "m3", "m4"]));
        assert!(advance.state.is_curriculum_complete(&curriculum));
        assert_eq!(
            advance.outcome,
            ClaimOutcome::Accepted {
                completed: "m4".to_string(),
                next: None
            }
        );
    }

    #[test]
    fn test_terminal_state_stays_terminal() {
        let curriculum = Arc::new(Curriculum::tic_tac_toe());
        let engine = ProgressionEngine::new(curriculum.clone());
        let state = state_at(&curriculum, None, &["m1", "m2", "m3", "m4"]);

        let advance = engine.advance(state, &Judgment::claiming("m4", ""), "thanks!");

        assert_eq!(advance.state.current_milestone, None);
        assert!(matches!(advance.outcome, ClaimOutcome::Rejected { .. }));
        assert!(advance.violations.is_empty());
    }

    #[test]
    fn test_identified_accumulates_known_ids() {
        let curriculum = three_step();
        let engine = ProgressionEngine::new(curriculum.clone());
        let state = state_at(&curriculum, Some("m1"), &[]);

        let advance = engine.advance(
            state,
            &Judgment::no_claim("").with_identified(["m2", "bogus"]),
            "what about input?",
        );
        let advance = engine.advance(
            advance.state,
            &Judgment::no_claim("").with_identified(["m3"]),
            "and winning?",
        );

        assert_eq!(advance.state.milestones_identified, set(&["m2", "m3"]));
        assert_eq!(advance.state.current_milestone.as_deref(), Some("m1"));
    }

    #[test]
    fn test_repairs_completed_active_milestone() {
        let curriculum = three_step();
        let engine = ProgressionEngine::new(curriculum.clone());
        // Corrupted state: the active milestone is already completed.
        let state = state_at(&curriculum, Some("m1"), &["m1"]);

        let advance = engine.advance(state, &Judgment::no_claim(""), "hi");

        assert_eq!(advance.state.current_milestone.as_deref(), Some("m2"));
        assert_eq!(
            advance.violations,
            vec![InvariantViolation::ActiveMilestoneCompleted {
                milestone: "m1".to_string(),
                reassigned: Some("m2".to_string())
            }]
        );
    }

    #[test]
    fn test_repairs_locked_and_unknown_active_milestone() {
        let curriculum = three_step();

        let mut locked = state_at(&curriculum, Some("m3"), &[]);
        let violation = repair_active(&curriculum, &mut locked).unwrap();
        assert!(matches!(violation, InvariantViolation::ActiveMilestoneLocked { .. }));
        assert_eq!(locked.current_milestone.as_deref(), Some("m1"));

        let mut unknown = state_at(&curriculum, Some("m9"), &["m1"]);
        let violation = repair_active(&curriculum, &mut unknown).unwrap();
        assert!(matches!(violation, InvariantViolation::UnknownActiveMilestone { .. }));
        assert_eq!(unknown.current_milestone.as_deref(), Some("m2"));

        let mut healthy = state_at(&curriculum, Some("m2"), &["m1"]);
        assert!(repair_active(&curriculum, &mut healthy).is_none());
    }

    #[test]
    fn test_enforce_monotonic_restores_previous_set() {
        let previous = set(&["m1", "m2"]);
        let mut candidate = set(&["m1", "m3"]);

        let violation = enforce_monotonic(&previous, &mut candidate).unwrap();

        assert_eq!(candidate, previous);
        assert_eq!(
            violation,
            InvariantViolation::CompletedSetShrank {
                before: 2,
                after: 2,
                lost: vec!["m2".to_string()]
            }
        );

        let mut grown = set(&["m1", "m2", "m3"]);
        assert!(enforce_monotonic(&previous, &mut grown).is_none());
        assert_eq!(grown.len(), 3);
    }

    #[test]
    fn test_record_oracle_failure_keeps_progress() {
        let curriculum = three_step();
        let engine = ProgressionEngine::new(curriculum.clone());
        let state = state_at(&curriculum, Some("m2"), &["m1"]);

        let after = engine.record_oracle_failure(state.clone(), "my code");

        assert_eq!(after.current_milestone, state.current_milestone);
        assert_eq!(after.milestones_completed, state.milestones_completed);
        assert_eq!(after.transcript.len(), 2);
        assert_eq!(after.transcript[0].content, "my code");
        assert_eq!(after.transcript[1].content, GENERIC_APOLOGY);
    }
}
