//! Session data model.
//!
//! `SessionState` is the mutable aggregate for one tutoring conversation. It is
//! mutated once per turn by the progression engine and the phase controller,
//! and persisted between turns by a [`crate::store::SessionStore`].

use crate::curriculum::{Curriculum, MilestoneId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Maps a client-supplied role onto the transcript roles. Only `assistant`
    /// is a tutor turn; anything else is treated as the student speaking.
    pub fn normalize(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("assistant") {
            Role::Assistant
        } else {
            Role::User
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Pedagogical mode governing whether the tutor asks guiding questions or
/// hands out concrete coding tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Discussion,
    Coding,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Discussion => "DISCUSSION",
            Phase::Coding => "CODING",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid phase: '{0}'")]
pub struct ParsePhaseError(pub String);

impl FromStr for Phase {
    type Err = ParsePhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DISCUSSION" => Ok(Phase::Discussion),
            "CODING" => Ok(Phase::Coding),
            _ => Err(ParsePhaseError(s.to_string())),
        }
    }
}

/// Per-conversation tutoring state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub transcript: Vec<ChatMessage>,
    /// Milestone being worked on. `None` before bootstrap and after the whole
    /// curriculum is finished.
    pub current_milestone: Option<MilestoneId>,
    /// Never shrinks between two consecutive turns.
    pub milestones_completed: BTreeSet<MilestoneId>,
    /// Milestones the student has mentioned. Advisory only.
    pub milestones_identified: BTreeSet<MilestoneId>,
    /// Present only when phase tracking is enabled.
    pub phase: Option<Phase>,
    pub pending_feedback: Option<String>,
    /// Milestone accepted during the current turn; cleared by the composer.
    pub just_completed: Option<MilestoneId>,
    /// Set once the completion message has been delivered.
    pub completion_announced: bool,
    pub student_background: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Seeds a fresh session: nothing completed, the first unlocked milestone
    /// active, and DISCUSSION as the starting phase when phases are tracked.
    pub fn new(
        session_id: impl Into<String>,
        curriculum: &Curriculum,
        track_phase: bool,
        student_background: impl Into<String>,
    ) -> Self {
        let milestones_completed = BTreeSet::new();
        let current_milestone = curriculum
            .first_available(&milestones_completed)
            .map(|m| m.id.clone());
        let now = Utc::now();

        Self {
            session_id: session_id.into(),
            transcript: Vec::new(),
            current_milestone,
            milestones_completed,
            milestones_identified: BTreeSet::new(),
            phase: track_phase.then_some(Phase::Discussion),
            pending_feedback: None,
            just_completed: None,
            completion_announced: false,
            student_background: student_background.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.transcript.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.transcript.push(ChatMessage::assistant(content));
    }

    /// The trailing `n` transcript entries.
    pub fn recent_history(&self, n: usize) -> &[ChatMessage] {
        let start = self.transcript.len().saturating_sub(n);
        &self.transcript[start..]
    }

    pub fn milestones_remaining(&self, curriculum: &Curriculum) -> Vec<MilestoneId> {
        curriculum.remaining(&self.milestones_completed)
    }

    pub fn is_curriculum_complete(&self, curriculum: &Curriculum) -> bool {
        curriculum.is_complete(&self.milestones_completed)
    }
}
