use crate::store::StoreError;

/// Errors that escape a turn.
///
/// Oracle outages and malformed judgments are absorbed inside the turn and
/// never show up here.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    #[error("Conversation must contain at least one message")]
    EmptyConversation,
    #[error("Expected the last message to be from the user")]
    LastMessageNotFromUser,
    #[error("Phase oracle violated its contract: invalid phase '{0}'")]
    InvalidPhase(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TutorError {
    /// True for errors caused by the request rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TutorError::EmptyConversation | TutorError::LastMessageNotFromUser
        )
    }
}
