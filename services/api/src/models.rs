//! API Models
//!
//! Request and response bodies for the HTTP API, with `utoipa` schemas for the
//! generated OpenAPI document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tutor_core::{Curriculum, SessionState, turn::IncomingMessage};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ChatMessagePayload {
    /// `user` or `assistant`; anything unrecognised is treated as `user`.
    #[schema(example = "user")]
    pub role: String,
    #[schema(example = "I think the board should be a 3x3 list of lists.")]
    pub content: String,
}

impl From<ChatMessagePayload> for IncomingMessage {
    fn from(payload: ChatMessagePayload) -> Self {
        IncomingMessage::new(payload.role, payload.content)
    }
}

#[derive(Deserialize, ToSchema, Debug, Clone)]
pub struct ChatRequest {
    #[serde(rename = "sessionId", default)]
    #[schema(example = "0b6d3c8e-3f57-4f43-9a0e-0c3ff2a4c0de")]
    pub session_id: Option<String>,
    pub messages: Vec<ChatMessagePayload>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
}

/// Progress view of a tutoring session.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct SessionSnapshot {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[schema(example = "m2")]
    pub current_milestone: Option<String>,
    pub milestones_completed: Vec<String>,
    pub milestones_identified: Vec<String>,
    pub milestones_remaining: Vec<String>,
    pub curriculum_complete: bool,
    /// `DISCUSSION`, `CODING`, or absent when phase tracking is off.
    #[schema(example = "DISCUSSION")]
    pub phase: Option<String>,
    pub transcript: Vec<ChatMessagePayload>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn from_state(state: &SessionState, curriculum: &Curriculum) -> Self {
        Self {
            session_id: state.session_id.clone(),
            current_milestone: state.current_milestone.clone(),
            milestones_completed: state.milestones_completed.iter().cloned().collect(),
            milestones_identified: state.milestones_identified.iter().cloned().collect(),
            milestones_remaining: state.milestones_remaining(curriculum),
            curriculum_complete: state.is_curriculum_complete(curriculum),
            phase: state.phase.map(|p| p.to_string()),
            transcript: state
                .transcript
                .iter()
                .map(|m| ChatMessagePayload {
                    role: m.role.to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;
    use tutor_core::Phase;

    #[test]
    fn test_chat_request_deserialization() {
        let json = r#"{
            "sessionId": "abc-123",
            "messages": [
                {"role": "assistant", "content": "What should the board look like?"},
                {"role": "user", "content": "A 2D list"}
            ]
        }"#;
        let request: ChatRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.session_id.as_deref(), Some("abc-123"));
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[1].content, "A 2D list");
    }

    #[test]
    fn test_chat_request_without_session_id() {
        let json = r#"{"messages": [{"role": "user", "content": "hi"}]}"#;
        let request: ChatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.session_id, None);

        let json = r#"{"sessionId": null, "messages": []}"#;
        let request: ChatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.session_id, None);
        assert!(request.messages.is_empty());
    }

    #[test]
    fn test_chat_request_missing_messages() {
        let json = r#"{"sessionId": "abc"}"#;
        let result: Result<ChatRequest, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_chat_response_uses_camel_case_session_id() {
        let response = ChatResponse {
            content: "Great start!".to_string(),
            session_id: "abc".to_string(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["sessionId"], "abc");
        assert_eq!(json["content"], "Great start!");
        assert!(json.get("session_id").is_none());
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            error: "Expected the last message to be from the user".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(
            json,
            r#"{"error":"Expected the last message to be from the user"}"#
        );
    }

    #[test]
    fn test_payload_into_incoming_message() {
        let payload = ChatMessagePayload {
            role: "tutor".to_string(),
            content: "hello".to_string(),
        };
        let incoming: IncomingMessage = payload.into();
        assert_eq!(incoming.role, "tutor");
        assert_eq!(incoming.content, "hello");
    }

    #[test]
    fn test_snapshot_from_state() {
        let curriculum = Curriculum::tic_tac_toe();
        let mut state = SessionState::new("s1", &curriculum, true, "");
        state.milestones_completed.insert("m1".to_string());
        state.current_milestone = Some("m2".to_string());
        state.phase = Some(Phase::Coding);
        state.push_user("here is my board");
        state.push_assistant("Nice!");

        let snapshot = SessionSnapshot::from_state(&state, &curriculum);

        assert_eq!(snapshot.session_id, "s1");
        assert_eq!(snapshot.current_milestone.as_deref(), Some("m2"));
        assert_eq!(snapshot.milestones_completed, vec!["m1"]);
        assert_eq!(snapshot.milestones_remaining, vec!["m2", "m3", "m4"]);
        assert!(!snapshot.curriculum_complete);
        assert_eq!(snapshot.phase.as_deref(), Some("CODING"));
        assert_eq!(snapshot.transcript[1].role, "assistant");

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["phase"], "CODING");
    }
}
