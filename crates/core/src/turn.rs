//! Turn processing pipeline.
//!
//! One student message flows through:
//!
//! 1. Session Store: load the session, or start a fresh one on first contact.
//! 2. Progression Engine: ask the judgment oracle, then apply its verdict.
//! 3. Phase Controller (when enabled): pick DISCUSSION or CODING.
//! 4. Reply generation and the Response Composer.
//! 5. Session Store: persist the updated state.
//!
//! Turns on one session are serialized by the store's per-session lock. If
//! the judgment oracle fails, the student gets a generic apology and the
//! progression state is left exactly as it was.

use crate::composer::{GENERIC_APOLOGY, ResponseComposer};
use crate::curriculum::Curriculum;
use crate::error::TutorError;
use crate::oracle::{
    JudgmentOracle, OracleContext, OracleError, PhaseOracle, ReplyGenerator, with_timeout,
};
use crate::phase::{PhaseController, PhaseStep, reset_for_new_milestone};
use crate::progression::{Advance, ClaimOutcome, InvariantViolation, ProgressionEngine};
use crate::session::{ChatMessage, Phase, Role};
use crate::store::{SessionOptions, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A message as supplied by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

impl IncomingMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: Option<String>,
    pub messages: Vec<IncomingMessage>,
}

/// What a turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub session_id: String,
    pub reply: String,
    /// `None` when the judgment oracle failed and progression was skipped.
    pub claim: Option<ClaimOutcome>,
    pub phase: PhaseStep,
    pub violations: Vec<InvariantViolation>,
    pub oracle_failure: Option<OracleError>,
}

#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Trailing transcript entries passed to oracles.
    pub history_window: usize,
    pub oracle_timeout: Duration,
    pub student_background: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            history_window: 5,
            oracle_timeout: Duration::from_secs(30),
            student_background: String::new(),
        }
    }
}

pub struct TurnProcessor {
    curriculum: Arc<Curriculum>,
    store: Arc<dyn SessionStore>,
    judge: Arc<dyn JudgmentOracle>,
    phases: Option<PhaseController>,
    generator: Option<Arc<dyn ReplyGenerator>>,
    engine: ProgressionEngine,
    composer: ResponseComposer,
    config: TurnConfig,
}

impl TurnProcessor {
    pub fn new(
        curriculum: Arc<Curriculum>,
        store: Arc<dyn SessionStore>,
        judge: Arc<dyn JudgmentOracle>,
        config: TurnConfig,
    ) -> Self {
        Self {
            engine: ProgressionEngine::new(curriculum.clone()),
            composer: ResponseComposer::new(curriculum.clone()),
            curriculum,
            store,
            judge,
            phases: None,
            generator: None,
            config,
        }
    }

    /// Enables the DISCUSSION/CODING phase controller for new sessions.
    pub fn with_phase_oracle(mut self, oracle: Arc<dyn PhaseOracle>) -> Self {
        self.phases = Some(PhaseController::new(oracle, self.config.oracle_timeout));
        self
    }

    /// Uses a dedicated generator for tutor replies instead of the judgment's
    /// own message.
    pub fn with_reply_generator(mut self, generator: Arc<dyn ReplyGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn curriculum(&self) -> &Arc<Curriculum> {
        &self.curriculum
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Processes one student message end to end.
    #[instrument(name = "turn", skip_all, fields(session_id))]
    pub async fn process_turn(&self, request: TurnRequest) -> Result<TurnOutcome, TutorError> {
        let (input, prior) = split_messages(request.messages)?;
        let session_id = request
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::Span::current().record("session_id", session_id.as_str());

        let _guard = self.store.lock(&session_id).await;

        let state = match self.store.get(&session_id).await? {
            Some(state) => state,
            None => {
                let options = SessionOptions {
                    track_phase: self.phases.is_some(),
                    student_background: self.config.student_background.clone(),
                };
                let mut state = self
                    .store
                    .create(Some(session_id.clone()), &self.curriculum, &options)
                    .await?;
                state.transcript.extend(prior);
                info!(current_milestone = ?state.current_milestone, "Started new tutoring session");
                state
            }
        };

        let ctx = OracleContext::from_state(
            self.curriculum.clone(),
            &state,
            &input,
            self.config.history_window,
        );
        let judgment = match with_timeout(self.config.oracle_timeout, self.judge.judge(&ctx)).await
        {
            Ok(judgment) => judgment,
            Err(err) => {
                warn!(error = %err, "Judgment oracle failed; replying with apology");
                let state = self.engine.record_oracle_failure(state, &input);
                self.store.put(state).await?;
                return Ok(TurnOutcome {
                    session_id,
                    reply: GENERIC_APOLOGY.to_string(),
                    claim: None,
                    phase: PhaseStep::Skipped,
                    violations: Vec::new(),
                    oracle_failure: Some(err),
                });
            }
        };

        let Advance {
            mut state,
            outcome,
            violations,
        } = self.engine.advance(state, &judgment, &input);

        if matches!(outcome, ClaimOutcome::Accepted { next: Some(_), .. }) {
            reset_for_new_milestone(&mut state);
        }

        let phase = match &self.phases {
            Some(controller) => {
                let ctx = OracleContext::from_state(
                    self.curriculum.clone(),
                    &state,
                    &input,
                    self.config.history_window,
                );
                controller.step(&mut state, &self.curriculum, &ctx).await?
            }
            None => PhaseStep::Skipped,
        };

        let tutor_text = match &self.generator {
            Some(generator) => {
                let ctx = OracleContext::from_state(
                    self.curriculum.clone(),
                    &state,
                    &input,
                    self.config.history_window,
                );
                let phase = state.phase.unwrap_or(Phase::Discussion);
                match with_timeout(self.config.oracle_timeout, generator.generate(phase, &ctx)).await
                {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "Reply generation failed; using judgment message");
                        judgment.message.clone()
                    }
                }
            }
            None => judgment.message.clone(),
        };

        let reply = self.composer.compose(&mut state, &tutor_text);
        self.store.put(state).await?;

        Ok(TurnOutcome {
            session_id,
            reply,
            claim: Some(outcome),
            phase,
            violations,
            oracle_failure: None,
        })
    }
}

/// Separates the final user message from the history that precedes it.
fn split_messages(
    mut messages: Vec<IncomingMessage>,
) -> Result<(String, Vec<ChatMessage>), TutorError> {
    let last = messages.pop().ok_or(TutorError::EmptyConversation)?;
    if !last.role.trim().eq_ignore_ascii_case("user") {
        return Err(TutorError::LastMessageNotFromUser);
    }
    let prior = messages
        .into_iter()
        .map(|m| ChatMessage {
            role: Role::normalize(&m.role),
            content: m.content,
        })
        .collect();
    Ok((last.content, prior))
}
