//! Public error taxonomy for the cryptographic core.
//!
//! One variant per failure mode in the design's error table. `AuthFailure`
//! intentionally carries no detail: HMAC mismatch, padding-validation
//! failure, and unknown-key-version all collapse to the same message so a
//! caller cannot learn which internal check rejected the frame.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EamsaError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EamsaError {
    #[error("invalid key length: expected 32 bytes, got {actual}")]
    InvalidKeyLength { actual: usize },

    #[error("invalid nonce length: expected 16 bytes, got {actual}")]
    InvalidNonceLength { actual: usize },

    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: &'static str },

    /// HMAC mismatch, padding validation failure, or unknown key version.
    /// Never carries which of the three actually happened.
    #[error("authentication failed")]
    AuthFailure,

    #[error("key version {0} not found")]
    KeyNotFound(u32),

    #[error("key version {version} is not in a valid state for this operation: {reason}")]
    KeyStateInvalid { version: u32, reason: &'static str },

    #[error("rotation rejected: key version {version} is only {age_days} day(s) old, minimum is {min_age_days}")]
    RotationTooSoon {
        version: u32,
        age_days: i64,
        min_age_days: u32,
    },

    #[error("entropy source unavailable: {reason}")]
    EntropyUnavailable { reason: &'static str },

    #[error("self-test failed: {0}")]
    SelfTestFailed(&'static str),

    #[error("invalid rotation policy: {0}")]
    PolicyInvalid(&'static str),
}
