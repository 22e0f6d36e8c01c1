//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - IDs are serialised as hex strings.
//! - Datetimes are serialised as RFC 3339 strings.
//! - Derived values (election status, candidate party) are filled in.

pub mod admin;
pub mod ballot;
pub mod candidate;
pub mod election;
pub mod field;
pub mod id;
pub mod log;
pub mod position;
pub mod voter;
