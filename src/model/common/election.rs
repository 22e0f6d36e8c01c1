use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an election is in its lifecycle.
///
/// This is never stored: it is always derived from the election's start and
/// end times relative to the moment of the read, so there is exactly one
/// source of truth for whether an election is accepting ballots.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionStatus {
    /// The voting window has not opened yet.
    Upcoming,
    /// Ballots are being accepted.
    Active,
    /// The voting window has closed.
    Completed,
}

impl ElectionStatus {
    /// Derive the status of an election with the given window at time `now`.
    /// Both ends of the window are inclusive.
    pub fn at(start_time: DateTime<Utc>, end_time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if now < start_time {
            Self::Upcoming
        } else if now > end_time {
            Self::Completed
        } else {
            Self::Active
        }
    }
}
