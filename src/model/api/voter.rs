use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    model::{
        auth::password,
        db::voter::{NewVoter, Voter, VoterStatus},
    },
};

use super::{
    field::{self, FieldError},
    id::ApiId,
};

/// A voter to register, either from an admin request or a roster row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterSpec {
    pub student_number: String,
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub last_name: String,
    /// Initial password. Defaults to the student number.
    #[serde(default)]
    pub password: Option<String>,
}

impl VoterSpec {
    /// Trim every field, rejecting the spec if a required one is blank.
    pub fn normalise(self) -> std::result::Result<Self, FieldError> {
        let required = |field: &'static str, value: &str| {
            let value = value.trim();
            if value.is_empty() {
                Err(FieldError::new(field, "must not be empty"))
            } else {
                Ok(value.to_string())
            }
        };
        Ok(Self {
            student_number: required("student_number", &self.student_number)?,
            first_name: required("first_name", &self.first_name)?,
            middle_name: field::optional(self.middle_name),
            last_name: required("last_name", &self.last_name)?,
            password: self.password.filter(|p| !p.is_empty()),
        })
    }

    /// Normalise the spec and hash its password.
    pub fn into_voter(self) -> Result<NewVoter> {
        let spec = self.normalise()?;
        let password = spec
            .password
            .as_deref()
            .unwrap_or(&spec.student_number);
        let password_hash = password::hash(password)?;
        Ok(NewVoter {
            password_hash,
            student_number: spec.student_number,
            first_name: spec.first_name,
            middle_name: spec.middle_name,
            last_name: spec.last_name,
        })
    }
}

/// Raw voter credentials, received from a user.
#[derive(Clone, Deserialize, Serialize)]
pub struct VoterCredentials {
    pub student_number: String,
    pub password: String,
}

/// A voter, as shown to admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterDescription {
    pub id: ApiId,
    pub student_number: String,
    pub name: String,
    pub activated: bool,
    pub voted: bool,
}

impl VoterDescription {
    /// A voter who has not voted.
    pub fn new(voter: Voter, activated: bool) -> Self {
        Self {
            id: voter.id.into(),
            name: voter.full_name(),
            student_number: voter.voter.student_number,
            activated,
            voted: false,
        }
    }

    /// A voter as their status record describes them. A voter with no
    /// status is treated as inactive.
    pub fn with_status(voter: Voter, status: Option<&VoterStatus>) -> Self {
        let voted = status.map_or(false, |s| s.voted);
        Self {
            voted,
            ..Self::new(voter, status.map_or(false, |s| s.activated))
        }
    }
}
