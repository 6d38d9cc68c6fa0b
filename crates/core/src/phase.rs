//! Phase Controller
//!
//! Two-state machine (DISCUSSION <-> CODING) deciding whether the tutor asks
//! guiding questions or hands out concrete coding tasks. The target phase
//! comes from a second oracle call each turn; if it differs from the current
//! phase the machine transitions, otherwise it stays put. There is no terminal
//! state. Once the curriculum is finished the oracle is no longer consulted.

use crate::curriculum::Curriculum;
use crate::error::TutorError;
use crate::oracle::{OracleContext, OracleError, PhaseDecision, PhaseOracle, with_timeout};
use crate::session::{Phase, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What happened to the phase during a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseStep {
    Transitioned {
        from: Phase,
        to: Phase,
        reasoning: String,
    },
    Continued(Phase),
    /// Phase tracking is off for this session, or the curriculum is done.
    Skipped,
}

pub struct PhaseController {
    oracle: Arc<dyn PhaseOracle>,
    timeout: Duration,
}

impl PhaseController {
    pub fn new(oracle: Arc<dyn PhaseOracle>, timeout: Duration) -> Self {
        Self { oracle, timeout }
    }

    /// Consults the phase oracle and applies its decision to `state`.
    ///
    /// An unknown phase value is a broken oracle contract and fails the turn.
    /// Unavailable or malformed answers leave the phase unchanged.
    pub async fn step(
        &self,
        state: &mut SessionState,
        curriculum: &Curriculum,
        ctx: &OracleContext,
    ) -> Result<PhaseStep, TutorError> {
        let Some(current) = state.phase else {
            return Ok(PhaseStep::Skipped);
        };
        if state.is_curriculum_complete(curriculum) {
            return Ok(PhaseStep::Skipped);
        }

        match with_timeout(self.timeout, self.oracle.decide_phase(ctx)).await {
            Ok(decision) => Ok(apply_decision(state, current, decision)),
            Err(OracleError::InvalidPhase(value)) => Err(TutorError::InvalidPhase(value)),
            Err(err) => {
                warn!(error = %err, phase = %current, "Phase oracle failed; keeping current phase");
                Ok(PhaseStep::Continued(current))
            }
        }
    }
}

/// Puts a session back into DISCUSSION so each new milestone starts with a
/// conversation about its design.
pub fn reset_for_new_milestone(state: &mut SessionState) {
    if let Some(phase) = state.phase.as_mut() {
        if *phase != Phase::Discussion {
            info!(from = %phase, "Resetting phase to DISCUSSION for new milestone");
        }
        *phase = Phase::Discussion;
    }
}

fn apply_decision(state: &mut SessionState, current: Phase, decision: PhaseDecision) -> PhaseStep {
    if decision.phase == current {
        return PhaseStep::Continued(current);
    }
    info!(
        from = %current,
        to = %decision.phase,
        reasoning = %decision.reasoning,
        "Phase transition"
    );
    state.phase = Some(decision.phase);
    PhaseStep::Transitioned {
        from: current,
        to: decision.phase,
        reasoning: decision.reasoning,
    }
}
