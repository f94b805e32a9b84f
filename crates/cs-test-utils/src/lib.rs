//! # CS Test Utilities
//!
//! Shared test utilities for the conference service.
//!
//! This crate provides:
//! - A fully wired in-memory service (`TestContext`)
//! - Participant and conference fixtures
//! - Router request helpers for HTTP tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cs_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let ctx = TestContext::new();
//!     let ann = ctx.temporary("Ann").await;
//!     let (conference, _) = ctx.state.registry.create(Some(&ann), "Ann").await?;
//!
//!     let response = ctx
//!         .request(Method::GET, &format!("/api/v1/conferences/{}", conference.id), None, None)
//!         .await;
//!     assert_eq!(response.status, StatusCode::OK);
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod requests;

// Re-export commonly used items
pub use context::*;
pub use requests::*;
