//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests for tutoring
//! turns and session progress. It uses `utoipa` doc comments to generate
//! OpenAPI documentation.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{
        IntoResponse, Json, Response,
        sse::{Event, Sse},
    },
};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error, info};
use tutor_core::{TurnOutcome, TurnRequest, TutorError};

use crate::{
    models::{ChatRequest, ChatResponse, ErrorResponse, HealthResponse, SessionSnapshot},
    state::AppState,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl ApiError {
    /// Request-shaped turn errors become 400s; everything else is a 500.
    pub fn from_turn(err: TutorError) -> Self {
        if err.is_client_error() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::InternalServerError(err.into())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(error) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { error })).into_response()
            }
            ApiError::NotFound(error) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { error })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let error = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { error }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

async fn run_turn(
    state: &AppState,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<TurnOutcome, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let request = TurnRequest {
        session_id: payload.session_id,
        messages: payload.messages.into_iter().map(Into::into).collect(),
    };
    let outcome = state
        .processor
        .process_turn(request)
        .await
        .map_err(ApiError::from_turn)?;
    info!(
        session_id = %outcome.session_id,
        claim = ?outcome.claim,
        phase = ?outcome.phase,
        "Turn completed"
    );
    Ok(outcome)
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Process one student message and return the tutor reply.
#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Tutor reply", body = ChatResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let outcome = run_turn(&state, payload).await?;
    Ok(Json(ChatResponse {
        content: outcome.reply,
        session_id: outcome.session_id,
    }))
}

#[derive(Serialize)]
struct SessionEvent<'a> {
    #[serde(rename = "sessionId")]
    session_id: &'a str,
}

#[derive(Serialize)]
struct ChunkEvent<'a> {
    content: &'a str,
}

/// Splits a reply into word chunks whose concatenation is the reply itself.
pub fn word_chunks(text: &str) -> Vec<&str> {
    text.split_inclusive(char::is_whitespace).collect()
}

fn stream_events(outcome: &TurnOutcome) -> Result<Vec<Event>, axum::Error> {
    let mut events = Vec::new();
    events.push(Event::default().event("session").json_data(SessionEvent {
        session_id: &outcome.session_id,
    })?);
    for chunk in word_chunks(&outcome.reply) {
        events.push(
            Event::default()
                .event("chunk")
                .json_data(ChunkEvent { content: chunk })?,
        );
    }
    events.push(Event::default().event("done").data("{}"));
    Ok(events)
}

/// Process one student message and stream the tutor reply as Server-Sent
/// Events: a `session` event, one `chunk` event per word, then `done`.
#[utoipa::path(
    post,
    path = "/api/chat/stream",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Event stream of the tutor reply", body = String, content_type = "text/event-stream"),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let outcome = run_turn(&state, payload).await?;
    let events = stream_events(&outcome)?;
    debug!(session_id = %outcome.session_id, events = events.len(), "Streaming reply");
    Ok(Sse::new(stream::iter(events.into_iter().map(Ok))))
}

/// Get the progress snapshot of a tutoring session.
#[utoipa::path(
    get,
    path = "/api/sessions/{id}",
    responses(
        (status = 200, description = "Session progress", body = SessionSnapshot),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = String, Path, description = "Session ID")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let session = state
        .processor
        .store()
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session '{}' not found", id)))?;
    Ok(Json(SessionSnapshot::from_state(
        &session,
        state.processor.curriculum(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_chunks_preserve_whitespace() {
        let text = "Great job!\n\nWhat comes  next?";
        let chunks = word_chunks(text);
        assert_eq!(chunks, vec!["Great ", "job!\n", "\n", "What ", "comes ", " ", "next?"]);
        assert_eq!(chunks.concat(), text);
        assert!(word_chunks("").is_empty());
    }

    #[test]
    fn test_turn_errors_map_to_status() {
        let response = ApiError::from_turn(TutorError::LastMessageNotFromUser).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::from_turn(TutorError::InvalidPhase("REVIEW".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = ApiError::NotFound("missing".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
