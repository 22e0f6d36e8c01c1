use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{
    db::{
        candidate::{Candidate, NewCandidate},
        position::Position,
    },
    mongodb::Id,
};

use super::{
    election::ElectionDescription,
    field::{self, FieldError},
    id::ApiId,
};

/// A candidate specification, as submitted by an admin. The election comes
/// from the request path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub position_id: ApiId,
    pub name: String,
    #[serde(default)]
    pub party: Option<String>,
    #[serde(default)]
    pub photo: Option<String>,
    pub code: String,
}

impl CandidateSpec {
    /// Validate the fields and attach the candidate to `election_id`.
    pub fn into_candidate(self, election_id: Id) -> Result<NewCandidate, FieldError> {
        Ok(NewCandidate {
            election_id,
            position_id: self.position_id.into(),
            name: field::name("name", &self.name)?,
            party: field::optional(self.party),
            photo: field::optional(self.photo),
            code: field::name("code", &self.code)?,
        })
    }
}

/// A candidate, as shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDescription {
    pub id: ApiId,
    pub position_id: ApiId,
    pub name: String,
    /// "Independent" when the candidate has no party.
    pub party: String,
    pub photo: Option<String>,
    pub code: String,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id.into(),
            position_id: candidate.position_id.into(),
            party: candidate.party_or_independent().to_string(),
            name: candidate.candidate.name,
            photo: candidate.candidate.photo,
            code: candidate.candidate.code,
        }
    }
}

/// One position on a ballot, with everyone standing for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotPosition {
    pub id: ApiId,
    pub name: String,
    pub candidates: Vec<CandidateDescription>,
}

/// Everything a voter needs to fill in a ballot for one election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotPage {
    pub election: ElectionDescription,
    pub positions: Vec<BallotPosition>,
}

impl BallotPage {
    /// Group `candidates` under their positions.
    ///
    /// Positions are ordered by ID (i.e. creation order) and candidates by
    /// code. Positions nobody is standing for are left off.
    pub fn new(
        election: ElectionDescription,
        positions: Vec<Position>,
        candidates: Vec<Candidate>,
    ) -> Self {
        let mut by_position: BTreeMap<Id, Vec<Candidate>> = BTreeMap::new();
        for candidate in candidates {
            by_position
                .entry(candidate.position_id)
                .or_default()
                .push(candidate);
        }

        let mut positions = positions;
        positions.sort_by_key(|position| position.id);
        let positions = positions
            .into_iter()
            .filter_map(|position| {
                let mut candidates = by_position.remove(&position.id)?;
                candidates.sort_by(|a, b| a.code.cmp(&b.code));
                Some(BallotPosition {
                    id: position.id.into(),
                    name: position.position.name,
                    candidates: candidates.into_iter().map(Into::into).collect(),
                })
            })
            .collect();

        Self {
            election,
            positions,
        }
    }
}
