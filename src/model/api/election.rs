use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::election::ElectionStatus,
    db::election::{Election, NewElection},
};

use super::{
    field::{self, FieldError},
    id::ApiId,
};

/// An election specification, as submitted by an admin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSpec {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl TryFrom<ElectionSpec> for NewElection {
    type Error = FieldError;

    /// Enforces a usable name and a window that ends after it starts.
    fn try_from(spec: ElectionSpec) -> Result<Self, Self::Error> {
        let name = field::name("name", &spec.name)?;
        if spec.end_time <= spec.start_time {
            return Err(FieldError::new("end_time", "must be after start_time"));
        }
        Ok(Self {
            name,
            start_time: spec.start_time,
            end_time: spec.end_time,
            ballots_cast: 0,
        })
    }
}

/// An election, as shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionDescription {
    pub id: ApiId,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Derived at the moment the description was built.
    pub status: ElectionStatus,
}

impl ElectionDescription {
    pub fn at(election: Election, now: DateTime<Utc>) -> Self {
        Self {
            id: election.id.into(),
            status: election.status_at(now),
            name: election.election.name,
            start_time: election.election.start_time,
            end_time: election.election.end_time,
        }
    }
}

impl From<Election> for ElectionDescription {
    fn from(election: Election) -> Self {
        Self::at(election, Utc::now())
    }
}

/// An election together with how many ballots have been cast in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSummary {
    #[serde(flatten)]
    pub election: ElectionDescription,
    pub votes_count: u64,
}


#[cfg(test)]
mod tests {
    use chrono::Duration;

    use crate::model::mongodb::Id;

    use super::*;

    #[test]
    fn spec_must_end_after_it_starts() {
        let mut spec = ElectionSpec::active_example();
        spec.end_time = spec.start_time;
        assert_eq!(
            NewElection::try_from(spec).unwrap_err().field,
            "end_time"
        );
    }

    #[test]
    fn spec_name_is_trimmed() {
        let mut spec = ElectionSpec::active_example();
        spec.name = format!("  {}  ", spec.name);
        let election = NewElection::try_from(spec.clone()).unwrap();
        assert_eq!(election.name, spec.name.trim());

        spec.name = " ".to_string();
        assert_eq!(NewElection::try_from(spec).unwrap_err().field, "name");
    }

    #[test]
    fn description_carries_derived_status() {
        let election = Election {
            id: Id::new(),
            election: NewElection::active_example(),
        };
        let later = election.end_time + Duration::seconds(1);
        assert_eq!(
            ElectionDescription::at(election.clone(), later).status,
            ElectionStatus::Completed
        );
        assert_eq!(
            ElectionDescription::from(election).status,
            ElectionStatus::Active
        );
    }
}
