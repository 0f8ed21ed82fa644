//! Secret handling utilities.
//!
//! Re-exports the secrecy types used across fieldcheck-rs so callers
//! don't import the crate directly.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
