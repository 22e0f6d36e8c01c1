use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::model::{
    common::election::ElectionStatus,
    db::{candidate::Candidate, election::Election, voter::VoterStatus},
    mongodb::Id,
};

use super::BallotError;

/// A voter's choice of candidate for one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub position_id: Id,
    pub candidate_id: Id,
}

/// Everything the validator needs to know about a voter and an election,
/// read in one go from the eligibility store.
#[derive(Debug, Clone, Default)]
pub struct EligibilitySnapshot {
    pub election: Option<Election>,
    pub status: Option<VoterStatus>,
    /// Whether a ballot marker already exists for this voter and election.
    pub already_voted: bool,
    /// The submitted candidates that exist, keyed by ID. Unknown IDs are
    /// simply absent.
    pub candidates: HashMap<Id, Candidate>,
}

/// A ballot that passed every check, ready for the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBallot {
    pub voter_id: Id,
    pub election_id: Id,
    /// In submission order.
    pub selections: Vec<Selection>,
}

/// Check a ballot against a snapshot of the voter's eligibility.
///
/// Checks run in a fixed order and the first failure is returned:
///
/// 1. the election exists and is active at `now`;
/// 2. the voter has a status and is activated;
/// 3. the voter has not already voted in this election;
/// 4. every candidate belongs to this election and stands for the position
///    it was selected under;
/// 5. no position is selected twice;
/// 6. there is at least one selection.
pub fn validate(
    voter_id: Id,
    election_id: Id,
    selections: &[Selection],
    snapshot: &EligibilitySnapshot,
    now: DateTime<Utc>,
) -> Result<ValidatedBallot, BallotError> {
    let election = snapshot
        .election
        .as_ref()
        .filter(|election| election.id == election_id)
        .ok_or(BallotError::ElectionNotFound(election_id))?;
    if election.status_at(now) != ElectionStatus::Active {
        return Err(BallotError::ElectionNotActive(election_id));
    }

    let status = snapshot
        .status
        .as_ref()
        .filter(|status| status.voter_id == voter_id)
        .ok_or(BallotError::VoterNotFound(voter_id))?;
    if !status.activated {
        return Err(BallotError::VoterNotActivated(voter_id));
    }

    if snapshot.already_voted {
        return Err(BallotError::AlreadyVoted);
    }

    for selection in selections {
        let belongs = snapshot
            .candidates
            .get(&selection.candidate_id)
            .map(|candidate| {
                candidate.election_id == election_id
                    && candidate.position_id == selection.position_id
            })
            .unwrap_or(false);
        if !belongs {
            return Err(BallotError::InvalidCandidate {
                candidate_id: selection.candidate_id,
                position_id: selection.position_id,
            });
        }
    }

    let mut positions = HashSet::with_capacity(selections.len());
    for selection in selections {
        if !positions.insert(selection.position_id) {
            return Err(BallotError::DuplicatePosition(selection.position_id));
        }
    }

    if selections.is_empty() {
        return Err(BallotError::EmptyBallot);
    }

    Ok(ValidatedBallot {
        voter_id,
        election_id,
        selections: selections.to_vec(),
    })
}
