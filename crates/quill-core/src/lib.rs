//! Core abstractions for Quill: rate-limit store contracts, journal rows,
//! summarizer and auth collaborators, and the error reporting sink.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod auth;
pub mod clock;
pub mod journal;
pub mod observability;
pub mod ratelimit;
pub mod summary;
