//! Request signing and callback verification for the two payment gateways the
//! booking service talks to.
//!
//! The gateways disagree on canonicalization, so each one gets its own module:
//! - [`momo`]: HMAC-SHA256 over a fixed, documented field order. Absent fields
//!   are rendered as `key=` rather than dropped.
//! - [`vnpay`]: HMAC-SHA512 over the key-sorted, form-urlencoded query string.
//!   Empty fields are dropped entirely.
//!
//! Nothing in this crate performs I/O.

pub mod momo;
pub mod vnpay;

mod digest;

pub use digest::digest_matches;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}

pub type Result<T> = std::result::Result<T, SignatureError>;
