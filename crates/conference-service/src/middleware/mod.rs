//! Middleware for the conference service.
//!
//! # Components
//!
//! - `auth` - Participant identification for open and protected routes

pub mod auth;

pub use auth::{optional_participant, require_participant, Acting, PARTICIPANT_HEADER};
