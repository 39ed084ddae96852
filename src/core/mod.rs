//! Core types shared across stacksplit.
//!
//! Currently this is the error type; the template model itself lives in
//! [`crate::template`] since it is the domain, not plumbing.

pub mod error;

pub use error::SplitError;
