use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Party shown for candidates who did not declare one.
pub const INDEPENDENT: &str = "Independent";

/// Core candidate data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCore {
    /// The election this candidate is standing in.
    pub election_id: Id,
    /// The single position this candidate is standing for.
    pub position_id: Id,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
    /// Reference to the candidate's photo in external storage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    /// Unique human-facing code, e.g. printed on posters.
    pub code: String,
}

impl CandidateCore {
    /// The party to display.
    pub fn party_or_independent(&self) -> &str {
        self.party.as_deref().unwrap_or(INDEPENDENT)
    }
}

/// A candidate without an ID.
pub type NewCandidate = CandidateCore;

/// A candidate from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub candidate: CandidateCore,
}

impl Deref for Candidate {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

impl DerefMut for Candidate {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.candidate
    }
}
