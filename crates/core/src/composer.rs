//! Response Composer
//!
//! Wraps the generated tutor text with the banners owed to the student this
//! turn and appends the result to the transcript as an assistant turn.
//!
//! Feedback for the active milestone and congratulations for a milestone that
//! was just finished are never shown together: a completion clears pending
//! feedback, and the just-completed marker is consumed here so the banner is
//! shown exactly once.

use crate::curriculum::Curriculum;
use crate::session::SessionState;
use std::sync::Arc;

/// Reply used whenever the tutor cannot produce anything better.
pub const GENERIC_APOLOGY: &str = "I'm sorry, I had trouble reviewing your last message. Could you send it again, or share the part of your code you're working on?";

pub fn celebration_banner(milestone_name: &str) -> String {
    format!(
        "🎉 Great job! You've successfully completed the milestone: {milestone_name}. Your code meets the requirements. Let's move on to the next part!"
    )
}

pub fn feedback_banner(milestone_name: &str, feedback: &str) -> String {
    format!("📝 Feedback on {milestone_name}: {feedback}")
}

/// Fixed closing message, independent of the model so the session always ends
/// cleanly.
pub fn completion_message(curriculum_name: &str) -> String {
    format!(
        "🏆 Congratulations! You've completed every milestone of the {curriculum_name}. You built the whole project step by step. Feel free to keep polishing it or ask me anything about your code."
    )
}

pub struct ResponseComposer {
    curriculum: Arc<Curriculum>,
}

impl ResponseComposer {
    pub fn new(curriculum: Arc<Curriculum>) -> Self {
        Self { curriculum }
    }

    /// Builds the reply for this turn, appends it to the transcript and
    /// returns it. Consumes `just_completed` and `pending_feedback`.
    pub fn compose(&self, state: &mut SessionState, tutor_text: &str) -> String {
        let mut parts: Vec<String> = Vec::new();
        let just_completed = state.just_completed.take();
        let pending_feedback = state.pending_feedback.take();

        if just_completed.is_none() {
            if let (Some(feedback), Some(current)) = (pending_feedback, &state.current_milestone) {
                if !state.milestones_completed.contains(current) {
                    parts.push(feedback_banner(
                        self.curriculum.display_name(current),
                        &feedback,
                    ));
                }
            }
        }

        if let Some(done) = &just_completed {
            parts.push(celebration_banner(self.curriculum.display_name(done)));
        }

        if !state.completion_announced && state.is_curriculum_complete(&self.curriculum) {
            parts.push(completion_message(self.curriculum.name()));
            state.completion_announced = true;
        }

        let tutor_text = tutor_text.trim();
        if !tutor_text.is_empty() {
            parts.push(tutor_text.to_string());
        }

        let reply = if parts.is_empty() {
            GENERIC_APOLOGY.to_string()
        } else {
            parts.join("\n\n")
        };
        state.push_assistant(reply.clone());
        reply
    }
}
