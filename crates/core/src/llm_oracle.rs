//! LLM-backed oracles.
//!
//! Renders the prompt templates from an [`OracleContext`], calls the model,
//! and parses the reply into the structured types the core trusts. The model
//! is asked for a JSON object; any prose around it is ignored.

use crate::curriculum::{Curriculum, MilestoneId};
use crate::llm_client::LLMClient;
use crate::oracle::{
    Judgment, JudgmentOracle, OracleContext, OracleError, PhaseDecision, PhaseOracle,
    ReplyGenerator,
};
use crate::prompts::{PromptSet, render};
use crate::session::{ChatMessage, Phase};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Implements every oracle capability on top of a single chat model.
pub struct LlmTutor {
    client: Arc<dyn LLMClient>,
    prompts: PromptSet,
}

impl LlmTutor {
    pub fn new(client: Arc<dyn LLMClient>, prompts: PromptSet) -> Self {
        Self { client, prompts }
    }

    async fn ask(&self, template: &str, ctx: &OracleContext) -> Result<String, OracleError> {
        let system_prompt = render(template, &template_vars(ctx));
        self.client
            .complete(system_prompt, vec![ChatMessage::user(ctx.input.clone())])
            .await
            .map_err(|e| OracleError::Unavailable(format!("{e:#}")))
    }
}

#[async_trait]
impl JudgmentOracle for LlmTutor {
    #[instrument(skip_all, fields(milestone = ?ctx.current_milestone))]
    async fn judge(&self, ctx: &OracleContext) -> Result<Judgment, OracleError> {
        let raw = self.ask(&self.prompts.judge, ctx).await?;
        debug!(raw = %raw, "Judge response");
        parse_judgment(&raw)
    }
}

#[async_trait]
impl PhaseOracle for LlmTutor {
    #[instrument(skip_all, fields(phase = ?ctx.current_phase))]
    async fn decide_phase(&self, ctx: &OracleContext) -> Result<PhaseDecision, OracleError> {
        let raw = self.ask(&self.prompts.phase, ctx).await?;
        debug!(raw = %raw, "Phase response");
        parse_phase_decision(&raw)
    }
}

#[async_trait]
impl ReplyGenerator for LlmTutor {
    #[instrument(skip_all, fields(phase = %phase))]
    async fn generate(&self, phase: Phase, ctx: &OracleContext) -> Result<String, OracleError> {
        let template = match phase {
            Phase::Discussion => &self.prompts.discussion,
            Phase::Coding => &self.prompts.coding,
        };
        let reply = self.ask(template, ctx).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(OracleError::Malformed("empty reply".to_string()));
        }
        Ok(reply.to_string())
    }
}

fn describe_milestone(curriculum: &Curriculum, id: &str) -> String {
    match curriculum.get(id) {
        Some(m) if m.prerequisites.is_empty() => format!("{} ({}): {}", m.id, m.name, m.description),
        Some(m) => format!(
            "{} ({}): {} [requires: {}]",
            m.id,
            m.name,
            m.description,
            m.prerequisites.iter().cloned().collect::<Vec<_>>().join(", ")
        ),
        None => id.to_string(),
    }
}

fn bullet_list<'a>(curriculum: &Curriculum, ids: impl IntoIterator<Item = &'a MilestoneId>) -> String {
    let items: Vec<String> = ids
        .into_iter()
        .map(|id| format!("- {}", describe_milestone(curriculum, id)))
        .collect();
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join("\n")
    }
}

fn template_vars(ctx: &OracleContext) -> Vec<(&'static str, String)> {
    let curriculum = ctx.curriculum.as_ref();
    let all_ids: Vec<MilestoneId> = curriculum.ids().map(str::to_string).collect();
    let history = ctx
        .history
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    vec![
        ("curriculum_name", curriculum.name().to_string()),
        ("curriculum", bullet_list(curriculum, &all_ids)),
        (
            "current_milestone",
            ctx.current_milestone
                .as_deref()
                .map(|id| describe_milestone(curriculum, id))
                .unwrap_or_else(|| "none (curriculum complete)".to_string()),
        ),
        (
            "current_milestone_id",
            ctx.current_milestone.clone().unwrap_or_else(|| "none".to_string()),
        ),
        ("milestones_completed", bullet_list(curriculum, &ctx.completed)),
        ("available_milestones", bullet_list(curriculum, &ctx.available)),
        ("milestones_identified", bullet_list(curriculum, &ctx.identified)),
        (
            "current_phase",
            ctx.current_phase.unwrap_or(Phase::Discussion).to_string(),
        ),
        ("student_background", ctx.student_background.clone()),
        (
            "history",
            if history.is_empty() {
                "(no previous messages)".to_string()
            } else {
                history
            },
        ),
        ("input", ctx.input.clone()),
    ]
}

/// Slice from the first `{` to the last `}`.
fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

#[derive(Debug, Deserialize)]
struct JudgmentWire {
    message: String,
    #[serde(default)]
    milestone_completed: Option<serde_json::Value>,
    #[serde(default)]
    feedback: Option<String>,
    #[serde(default)]
    milestones_identified: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PhaseWire {
    phase: String,
    #[serde(default)]
    reasoning: String,
}

/// Parses a judge reply. Non-string claim values (e.g. `false`) count as no
/// claim.
pub fn parse_judgment(raw: &str) -> Result<Judgment, OracleError> {
    let json = extract_json(raw)
        .ok_or_else(|| OracleError::Malformed("no JSON object in judge response".to_string()))?;
    let wire: JudgmentWire =
        serde_json::from_str(json).map_err(|e| OracleError::Malformed(e.to_string()))?;

    let milestone_completed = match wire.milestone_completed {
        Some(serde_json::Value::String(s)) => Judgment::parse_claim(&s),
        _ => None,
    };
    let feedback = wire
        .feedback
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty());
    let milestones_identified: BTreeSet<MilestoneId> = wire
        .milestones_identified
        .into_iter()
        .filter_map(|id| Judgment::parse_claim(&id))
        .collect();

    Ok(Judgment {
        message: wire.message,
        milestone_completed,
        feedback,
        milestones_identified,
    })
}

/// Parses a phase oracle reply. Phase names are matched case-insensitively;
/// anything outside DISCUSSION/CODING is [`OracleError::InvalidPhase`].
pub fn parse_phase_decision(raw: &str) -> Result<PhaseDecision, OracleError> {
    let json = extract_json(raw)
        .ok_or_else(|| OracleError::Malformed("no JSON object in phase response".to_string()))?;
    let wire: PhaseWire =
        serde_json::from_str(json).map_err(|e| OracleError::Malformed(e.to_string()))?;
    let phase = wire
        .phase
        .parse::<Phase>()
        .map_err(|_| OracleError::InvalidPhase(wire.phase.clone()))?;
    Ok(PhaseDecision {
        phase,
        reasoning: wire.reasoning,
    })
}
