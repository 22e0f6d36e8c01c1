use rocket::http::Status;
use serde::Serialize;
use thiserror::Error;

use crate::model::mongodb::Id;

/// The broad class of a [`BallotError`], which decides how callers should
/// react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Something the ballot refers to does not exist.
    NotFound,
    /// The election or voter is not in a state that accepts ballots.
    InvalidState,
    /// The voter has already voted in this election.
    Conflict,
    /// The ballot itself is wrong and could be fixed and resubmitted.
    MalformedBallot,
}

impl ErrorKind {
    pub fn status(self) -> Status {
        match self {
            Self::NotFound => Status::NotFound,
            Self::InvalidState => Status::Forbidden,
            Self::Conflict => Status::Conflict,
            Self::MalformedBallot => Status::UnprocessableEntity,
        }
    }
}

/// Why a ballot was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BallotError {
    #[error("Election {0} not found")]
    ElectionNotFound(Id),
    #[error("Election {0} is not accepting ballots")]
    ElectionNotActive(Id),
    #[error("Voter {0} not found")]
    VoterNotFound(Id),
    #[error("Voter {0} is not activated")]
    VoterNotActivated(Id),
    #[error("Voter has already voted in this election")]
    AlreadyVoted,
    #[error("Candidate {candidate_id} is not standing for position {position_id} in this election")]
    InvalidCandidate { candidate_id: Id, position_id: Id },
    #[error("More than one selection for position {0}")]
    DuplicatePosition(Id),
    #[error("Ballot has no selections")]
    EmptyBallot,
}

impl BallotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ElectionNotFound(_) | Self::VoterNotFound(_) => ErrorKind::NotFound,
            Self::ElectionNotActive(_) | Self::VoterNotActivated(_) => ErrorKind::InvalidState,
            Self::AlreadyVoted => ErrorKind::Conflict,
            Self::InvalidCandidate { .. } | Self::DuplicatePosition(_) | Self::EmptyBallot => {
                ErrorKind::MalformedBallot
            }
        }
    }

    /// A stable machine-readable code for this rejection.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ElectionNotFound(_) => "election_not_found",
            Self::ElectionNotActive(_) => "election_not_active",
            Self::VoterNotFound(_) => "voter_not_found",
            Self::VoterNotActivated(_) => "voter_not_activated",
            Self::AlreadyVoted => "already_voted",
            Self::InvalidCandidate { .. } => "invalid_candidate",
            Self::DuplicatePosition(_) => "duplicate_position",
            Self::EmptyBallot => "empty_ballot",
        }
    }

    pub fn status(&self) -> Status {
        self.kind().status()
    }
}

/// The JSON body sent back for a rejected ballot.
#[derive(Debug, Serialize)]
pub struct BallotErrorBody {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
}

impl From<&BallotError> for BallotErrorBody {
    fn from(err: &BallotError) -> Self {
        Self {
            kind: err.kind(),
            code: err.code(),
            message: err.to_string(),
        }
    }
}
