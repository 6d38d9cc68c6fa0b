//! Milestone-driven tutoring core.
//!
//! A [`TurnProcessor`] takes one student message through judgment,
//! milestone progression, the DISCUSSION/CODING phase machine and response
//! composition, persisting the updated [`SessionState`] through a
//! [`SessionStore`]. Model calls sit behind the traits in [`oracle`].

pub mod composer;
pub mod curriculum;
pub mod error;
pub mod llm_client;
pub mod llm_oracle;
pub mod oracle;
pub mod phase;
pub mod progression;
pub mod prompts;
pub mod session;
pub mod store;
pub mod turn;

pub use curriculum::{Curriculum, CurriculumError, Milestone, MilestoneId};
pub use error::TutorError;
pub use oracle::{
    Judgment, JudgmentOracle, OracleContext, OracleError, PhaseDecision, PhaseOracle,
    ReplyGenerator,
};
pub use session::{ChatMessage, Phase, Role, SessionState};
pub use store::{InMemorySessionStore, SessionOptions, SessionStore, StoreError};
pub use turn::{IncomingMessage, TurnConfig, TurnOutcome, TurnProcessor, TurnRequest};
