use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::{auth::password, mongodb::Id};

/// Core voter user data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterCore {
    /// Institution-issued identifier; unique across voters.
    pub student_number: String,
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    pub last_name: String,
    pub password_hash: String,
}

impl VoterCore {
    /// Check whether the given password is correct.
    pub fn verify_password(&self, password: &str) -> bool {
        password::verify(&self.password_hash, password)
    }

    /// "First Middle Last", skipping a missing middle name.
    pub fn full_name(&self) -> String {
        match &self.middle_name {
            Some(middle) => format!("{} {} {}", self.first_name, middle, self.last_name),
            None => format!("{} {}", self.first_name, self.last_name),
        }
    }

    /// Case-insensitive substring match on the student number or full name.
    /// A blank search matches everyone.
    pub fn matches(&self, search: &str) -> bool {
        let search = search.trim().to_lowercase();
        search.is_empty()
            || self.student_number.to_lowercase().contains(&search)
            || self.full_name().to_lowercase().contains(&search)
    }
}

/// A voter without an ID.
pub type NewVoter = VoterCore;

/// A voter user from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub voter: VoterCore,
}

impl Deref for Voter {
    type Target = VoterCore;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}

impl DerefMut for Voter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.voter
    }
}

/// Whether a voter may vote, and whether they have.
/// Exactly one of these exists per voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterStatusCore {
    pub voter_id: Id,
    pub activated: bool,
    /// Set by the ledger when the voter's first ballot commits.
    pub voted: bool,
}

impl VoterStatusCore {
    /// A fresh status for the given voter.
    pub fn new(voter_id: Id, activated: bool) -> Self {
        Self {
            voter_id,
            activated,
            voted: false,
        }
    }
}

/// A voter status without an ID.
pub type NewVoterStatus = VoterStatusCore;

/// A voter status from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterStatus {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub status: VoterStatusCore,
}

impl Deref for VoterStatus {
    type Target = VoterStatusCore;

    fn deref(&self) -> &Self::Target {
        &self.status
    }
}

impl DerefMut for VoterStatus {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.status
    }
}
