//! DB-compatible (e.g. de/serialisable) types.
//!
//! The types in this module are serialised in an DB-friendly way, e.g.:
//!
//! - IDs and datetimes are serialised in MongoDB's own format.
//!
//! Each record has a core type without an ID (aliased as `New*`, used for
//! inserts) and a stored type that flattens the core alongside its `_id`.

pub mod admin;
pub mod candidate;
pub mod election;
pub mod log_entry;
pub mod position;
pub mod vote;
pub mod voter;
