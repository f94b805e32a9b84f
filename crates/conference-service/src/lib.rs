//! Conference Service Library
//!
//! Conference session lifecycle and messaging engine:
//!
//! - Conference creation, password gating and membership
//! - Presence tracking with one join row per live session
//! - Device configuration persistence and per-person merging
//! - Chats with encrypted-at-rest messages and topic fan-out
//! - Scheduled reclamation of unused conferences and temporary participants
//!
//! # Architecture
//!
//! The service follows the Handler -> Service -> Repository pattern:
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> repositories/*.rs
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP and WebSocket request handlers
//! - `middleware` - Participant identification
//! - `models` - Domain entities and API bodies
//! - `repositories` - Store trait with in-memory and Postgres implementations
//! - `routes` - Axum router and application state
//! - `services` - Business logic
//! - `tasks` - Reclamation scheduler

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
