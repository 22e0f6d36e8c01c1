use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// One voter's choice for one position in one election. Immutable once
/// written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCore {
    pub voter_id: Id,
    pub candidate_id: Id,
    pub election_id: Id,
    pub position_id: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

/// A vote from the database, with its unique ID.
///
/// Votes are only ever written by the ledger, which assigns the ID up front
/// so it can return the committed rows without reading them back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub vote: VoteCore,
}

impl Vote {
    pub fn new(vote: VoteCore) -> Self {
        Self { id: Id::new(), vote }
    }
}

impl Deref for Vote {
    type Target = VoteCore;

    fn deref(&self) -> &Self::Target {
        &self.vote
    }
}

/// Records that a voter has cast their ballot in an election.
///
/// The unique `(voter_id, election_id)` index on this collection is what
/// makes a second ballot for the same election fail, however the two
/// submissions interleave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotMarkerCore {
    pub voter_id: Id,
    pub election_id: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotMarker {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub marker: BallotMarkerCore,
}

impl BallotMarker {
    pub fn new(marker: BallotMarkerCore) -> Self {
        Self {
            id: Id::new(),
            marker,
        }
    }
}

impl Deref for BallotMarker {
    type Target = BallotMarkerCore;

    fn deref(&self) -> &Self::Target {
        &self.marker
    }
}
