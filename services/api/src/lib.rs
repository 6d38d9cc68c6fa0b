//! Tutor API Library Crate
//!
//! HTTP surface for the milestone tutor: configuration, shared state,
//! handlers and routing. The `api` binary is a thin wrapper around this
//! library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
