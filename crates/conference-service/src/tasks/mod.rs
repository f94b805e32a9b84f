//! Background tasks for the conference service.
//!
//! # Tasks
//!
//! - `reclamation` - Periodically reclaims unused conferences and stale
//!   temporary participants

pub mod reclamation;

pub use reclamation::{ReclamationHandle, ReclamationScheduler, ReclamationSettings};
