use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ballot::Selection, db::vote::Vote};

use super::id::ApiId;

/// One choice on a submitted ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSpec {
    pub position_id: ApiId,
    pub candidate_id: ApiId,
}

impl From<SelectionSpec> for Selection {
    fn from(spec: SelectionSpec) -> Self {
        Self {
            position_id: spec.position_id.into(),
            candidate_id: spec.candidate_id.into(),
        }
    }
}

/// A ballot, as submitted by a voter. The voter is never named here; it
/// always comes from their auth token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotSubmission {
    pub selections: Vec<SelectionSpec>,
}

impl BallotSubmission {
    pub fn selections(&self) -> Vec<Selection> {
        self.selections.iter().copied().map(Into::into).collect()
    }
}

/// A single recorded vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteDescription {
    pub id: ApiId,
    pub position_id: ApiId,
    pub candidate_id: ApiId,
}

/// Confirmation that a ballot was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub election_id: ApiId,
    pub cast_at: DateTime<Utc>,
    pub votes: Vec<VoteDescription>,
}

impl VoteReceipt {
    /// Build a receipt from the committed votes of a single ballot.
    pub fn new(election_id: ApiId, votes: Vec<Vote>) -> Self {
        let cast_at = votes
            .first()
            .map(|vote| vote.created_at)
            .unwrap_or_else(Utc::now);
        Self {
            election_id,
            cast_at,
            votes: votes
                .into_iter()
                .map(|vote| VoteDescription {
                    id: vote.id.into(),
                    position_id: vote.position_id.into(),
                    candidate_id: vote.candidate_id.into(),
                })
                .collect(),
        }
    }
}
