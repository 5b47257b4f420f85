//! Core data models for the signed-URL object store.
//!
//! Keys, access tiers and option sets are validated here once per request and
//! are immutable afterwards. They serialize naturally as JSON via `serde`.

pub mod access;
pub mod key;
pub mod metadata;
pub mod options;
pub mod signed_url;
