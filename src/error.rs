//! Error types for key allocation and lookup.
//!
//! Every error a bucket can return is a [`KeyError`]. Some of them are safe to
//! show to whoever submitted the request (pool exhausted, key taken, key
//! malformed); the rest point at a bug upstream of the bucket and are reduced
//! to a single generic message before they leave the process.

use thiserror::Error;

use crate::keyspace::charset::{CUSTOM_KEY_CHARSET, MAX_CUSTOM_KEY_LEN, MIN_CUSTOM_KEY_LEN};

/// The message shown to users for any error that is not user-facing.
pub const GENERIC_ERROR_MESSAGE: &str = "Unexpected server error";

/// Errors returned by [`KeyBucket`](crate::keyspace::KeyBucket) and the types built on it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The entry handed to `add` cannot be stored as given
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// A fixed-length bucket has no free keys left
    #[error("No keys left for key length {length}")]
    NoKeysLeft { length: usize },

    /// The custom bucket already holds its configured maximum
    #[error("No custom links left")]
    CapacityExceeded,

    /// The requested custom key is currently active
    #[error("Key is already in use")]
    KeyAlreadyInUse,

    /// The key has the wrong length or contains characters outside the charset
    #[error(
        "Error: key can only be of length >= {} and < {} and only use the following characters:\n{}",
        MIN_CUSTOM_KEY_LEN,
        MAX_CUSTOM_KEY_LEN,
        CUSTOM_KEY_CHARSET
    )]
    InvalidKey,

    /// The entry would already be expired on insertion
    #[error("timeout has to be in the future")]
    TimeoutInPast,

    /// The entry expires before the current tail of the expiry chain
    #[error("timeout has to be after the previous entry's timeout")]
    TimeoutOrderingViolation,

    /// No partition is configured for the requested domain
    #[error("unknown domain: {0}")]
    UnknownDomain(String),
}

impl KeyError {
    /// Returns true if the error text can be shown to the requester verbatim.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            KeyError::NoKeysLeft { .. }
                | KeyError::CapacityExceeded
                | KeyError::KeyAlreadyInUse
                | KeyError::InvalidKey
        )
    }

    /// The message to return to the requester.
    ///
    /// Internal errors collapse to [`GENERIC_ERROR_MESSAGE`]; their details
    /// only ever reach the log.
    pub fn public_message(&self) -> String {
        if self.is_user_facing() {
            self.to_string()
        } else {
            GENERIC_ERROR_MESSAGE.to_string()
        }
    }
}
