//! Service layer for the conference service.
//!
//! Business logic lives here; handlers stay thin and the store only persists.
//!
//! # Components
//!
//! - `identity` - display name / authenticated id to participant resolution
//! - `conferences` - conference registry: creation, password gating, membership
//! - `presence` - join rows, one per live session
//! - `devices` - device configuration persistence and merging
//! - `chats` - chat messaging hub with topic fan-out
//! - `sessions` - join/leave and connect-devices orchestration
//! - `cipher` - at-rest encryption of message text
//! - `topics` - in-process broadcast topics

pub mod chats;
pub mod cipher;
pub mod conferences;
pub mod devices;
pub mod identity;
pub mod presence;
pub mod sessions;
pub mod topics;

pub use chats::{ChatHub, JoinOutcome};
pub use cipher::MessageCipher;
pub use conferences::{ConferenceRegistry, LeaveOutcome, ReclaimReport, RegistrySettings};
pub use devices::DeviceAggregator;
pub use identity::{Identity, IdentityResolver, StoreDirectory, UserDirectory};
pub use presence::PresenceTracker;
pub use sessions::{ConferenceSessions, SessionJoin};
pub use topics::TopicHub;
