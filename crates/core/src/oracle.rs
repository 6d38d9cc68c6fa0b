//! Oracle capability boundary.
//!
//! The tutoring core never talks to a model directly. It asks narrow,
//! fallible capabilities for structured judgments and treats their output as
//! untrusted input: the progression engine decides what a judgment is allowed
//! to change.

use crate::curriculum::{Curriculum, MilestoneId};
use crate::session::{ChatMessage, Phase, SessionState};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Failures of an oracle call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    /// Transport failure or timeout.
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),
    /// The response did not match the expected schema.
    #[error("Oracle returned a malformed response: {0}")]
    Malformed(String),
    /// The phase oracle answered with a value outside the phase enum.
    #[error("Oracle returned an invalid phase: '{0}'")]
    InvalidPhase(String),
}

/// Everything an oracle may look at for one turn.
#[derive(Debug, Clone)]
pub struct OracleContext {
    pub curriculum: Arc<Curriculum>,
    pub current_milestone: Option<MilestoneId>,
    pub current_phase: Option<Phase>,
    pub completed: BTreeSet<MilestoneId>,
    pub available: Vec<MilestoneId>,
    pub identified: BTreeSet<MilestoneId>,
    pub history: Vec<ChatMessage>,
    pub input: String,
    pub student_background: String,
}

impl OracleContext {
    /// Snapshot of `state` with the trailing `history_window` transcript
    /// entries as they currently stand, plus the student's latest `input`.
    pub fn from_state(
        curriculum: Arc<Curriculum>,
        state: &SessionState,
        input: &str,
        history_window: usize,
    ) -> Self {
        let available = state.milestones_remaining(&curriculum);
        Self {
            current_milestone: state.current_milestone.clone(),
            current_phase: state.phase,
            completed: state.milestones_completed.clone(),
            available,
            identified: state.milestones_identified.clone(),
            history: state.recent_history(history_window).to_vec(),
            input: input.to_string(),
            student_background: state.student_background.clone(),
            curriculum,
        }
    }
}

/// Structured assessment of the student's latest message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Judgment {
    /// Tutor text proposed by the oracle.
    pub message: String,
    /// The milestone the oracle claims was just finished, if any.
    pub milestone_completed: Option<MilestoneId>,
    pub feedback: Option<String>,
    pub milestones_identified: BTreeSet<MilestoneId>,
}

impl Judgment {
    /// A judgment that claims nothing.
    pub fn no_claim(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// A judgment claiming `milestone` was completed.
    pub fn claiming(milestone: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            milestone_completed: Some(milestone.into()),
            ..Default::default()
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    pub fn with_identified<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.milestones_identified = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Interprets the wire value of `milestone_completed`: the literal
    /// `"none"` (any case) or a blank string means no claim.
    pub fn parse_claim(raw: &str) -> Option<MilestoneId> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Phase oracle output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseDecision {
    pub phase: Phase,
    pub reasoning: String,
}

/// Bounds an oracle call. Expiry is reported as [`OracleError::Unavailable`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, OracleError>
where
    F: Future<Output = Result<T, OracleError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| OracleError::Unavailable(format!("timed out after {limit:?}")))?
}

/// Assesses progress against the active milestone.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JudgmentOracle: Send + Sync {
    async fn judge(&self, ctx: &OracleContext) -> Result<Judgment, OracleError>;
}

/// Picks the pedagogical phase for the next reply.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PhaseOracle: Send + Sync {
    async fn decide_phase(&self, ctx: &OracleContext) -> Result<PhaseDecision, OracleError>;
}

/// Writes the tutor reply for a phase.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, phase: Phase, ctx: &OracleContext) -> Result<String, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_claim() {
        assert_eq!(Judgment::parse_claim("m2"), Some("m2".to_string()));
        assert_eq!(Judgment::parse_claim(" m2 "), Some("m2".to_string()));
        assert_eq!(Judgment::parse_claim("none"), None);
        assert_eq!(Judgment::parse_claim("None"), None);
        assert_eq!(Judgment::parse_claim(""), None);
    }

    #[test]
    fn test_context_from_state() {
        let curriculum = Arc::new(Curriculum::tic_tac_toe());
        let mut state = SessionState::new("s", &curriculum, true, "bg");
        state.milestones_completed.insert("m1".to_string());
        state.current_milestone = Some("m2".to_string());
        for i in 0..8 {
            state.push_user(format!("turn {i}"));
        }

        let ctx = OracleContext::from_state(curriculum, &state, "latest", 5);

        assert_eq!(ctx.current_milestone.as_deref(), Some("m2"));
        assert_eq!(ctx.current_phase, Some(Phase::Discussion));
        assert_eq!(ctx.available, vec!["m2", "m3", "m4"]);
        assert_eq!(ctx.history.len(), 5);
        assert_eq!(ctx.history[0].content, "turn 3");
        assert_eq!(ctx.input, "latest");
        assert_eq!(ctx.student_background, "bg");
    }

    #[tokio::test]
    async fn test_with_timeout_maps_expiry_to_unavailable() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, OracleError>(1)
        };
        let err = with_timeout(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, OracleError::Unavailable(msg) if msg.contains("timed out")));

        let fast = async { Ok::<_, OracleError>(7) };
        assert_eq!(with_timeout(Duration::from_secs(1), fast).await.unwrap(), 7);
    }

    #[test]
    fn test_judgment_builders() {
        let judgment = Judgment::claiming("m1", "well done")
            .with_feedback("clean code")
            .with_identified(["m1", "m2"]);
        assert_eq!(judgment.milestone_completed.as_deref(), Some("m1"));
        assert_eq!(judgment.feedback.as_deref(), Some("clean code"));
        assert_eq!(judgment.milestones_identified.len(), 2);
        assert_eq!(Judgment::no_claim("hi").milestone_completed, None);
    }
}
