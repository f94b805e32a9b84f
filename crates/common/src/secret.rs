//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used across Rendezvous for key material
//! and plaintext passwords. `Debug` output of both types is redacted, so any
//! struct deriving `Debug` that holds one is safe to log.
//!
//! Use `SecretBox<Vec<u8>>` for:
//! - The message encryption key
//!
//! Use `SecretString` for:
//! - Conference passwords between request parsing and hashing
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let password = SecretString::from("open sesame");
//! assert!(!format!("{password:?}").contains("sesame"));
//! assert_eq!(password.expose_secret(), "open sesame");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("hunter2");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_key_bytes_are_redacted() {
        let key: SecretBox<Vec<u8>> = SecretBox::new(Box::new(vec![7u8; 32]));
        let debug_str = format!("{key:?}");

        assert!(debug_str.contains("REDACTED"));
        assert_eq!(key.expose_secret().len(), 32);
    }

    #[test]
    fn test_deserialize_password_field() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct JoinRequest {
            display_name: String,
            password: SecretString,
        }

        let json = r#"{"display_name": "Ann", "password": "room-secret"}"#;
        let req: JoinRequest = serde_json::from_str(json).expect("deserialize");

        assert_eq!(req.password.expose_secret(), "room-secret");

        let debug = format!("{req:?}");
        assert!(debug.contains("Ann"));
        assert!(!debug.contains("room-secret"));
    }
}
