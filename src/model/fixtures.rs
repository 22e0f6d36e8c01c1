//! Seed data shared by database tests.

use mongodb::{bson::doc, Database};

use crate::model::{
    api::voter::VoterCredentials,
    auth::Principal,
    ballot::Selection,
    db::{
        candidate::{Candidate, NewCandidate},
        election::{Election, NewElection},
        position::{Position, PositionCore},
        voter::{Voter, VoterCore, VoterStatus, VoterStatusCore},
    },
    mongodb::{Coll, Id},
};

/// An active election with candidates A and B standing for President and C
/// for Vice President, and an activated voter who has not voted.
pub struct Fixture {
    pub election: Election,
    pub president: Position,
    pub vice: Position,
    pub a: Candidate,
    pub b: Candidate,
    pub c: Candidate,
    pub voter: Voter,
}

impl Fixture {
    /// Insert the fixture. The voter is the one matching
    /// [`VoterCredentials::example`]; if a test has already logged them in,
    /// that record is reused.
    pub async fn seed(db: &Database) -> Self {
        let election = Election {
            id: Id::new(),
            election: NewElection::active_example(),
        };
        Coll::<Election>::from_db(db)
            .insert_one(&election, None)
            .await
            .unwrap();

        let positions = Coll::<Position>::from_db(db);
        let president = Position {
            id: Id::new(),
            position: PositionCore {
                name: "President".to_string(),
            },
        };
        let vice = Position {
            id: Id::new(),
            position: PositionCore {
                name: "Vice President".to_string(),
            },
        };
        positions
            .insert_many([&president, &vice], None)
            .await
            .unwrap();

        let candidate = |position: &Position, name: &str, code: &str| Candidate {
            id: Id::new(),
            candidate: NewCandidate {
                election_id: election.id,
                position_id: position.id,
                name: name.to_string(),
                party: (code != "C-1").then(|| "Reform".to_string()),
                photo: None,
                code: code.to_string(),
            },
        };
        let a = candidate(&president, "Ada", "P-1");
        let b = candidate(&president, "Brian", "P-2");
        let c = candidate(&vice, "Carol", "C-1");
        Coll::<Candidate>::from_db(db)
            .insert_many([&a, &b, &c], None)
            .await
            .unwrap();

        let voter = Self::activated_voter(db).await;

        Self {
            election,
            president,
            vice,
            a,
            b,
            c,
            voter,
        }
    }

    /// The example voter, inserted with an activated status if absent.
    pub async fn activated_voter(db: &Database) -> Voter {
        let voters = Coll::<Voter>::from_db(db);
        let student_number = VoterCredentials::example().student_number;
        if let Some(voter) = voters
            .find_one(doc! { "student_number": &student_number }, None)
            .await
            .unwrap()
        {
            return voter;
        }

        let voter = Voter {
            id: Id::new(),
            voter: VoterCore::example(),
        };
        voters.insert_one(&voter, None).await.unwrap();
        let status = VoterStatus {
            id: Id::new(),
            status: VoterStatusCore::new(voter.id, true),
        };
        Coll::<VoterStatus>::from_db(db)
            .insert_one(&status, None)
            .await
            .unwrap();
        voter
    }

    /// Insert another election, returning its ID.
    pub async fn insert_election(&self, db: &Database, election: NewElection) -> Id {
        let election = Election {
            id: Id::new(),
            election,
        };
        Coll::<Election>::from_db(db)
            .insert_one(&election, None)
            .await
            .unwrap();
        election.id
    }

    pub fn principal(&self) -> Principal {
        Principal::voter(self.voter.id)
    }

    pub fn select_a(&self) -> Selection {
        Self::select(&self.a)
    }

    pub fn select_b(&self) -> Selection {
        Self::select(&self.b)
    }

    pub fn select_c(&self) -> Selection {
        Self::select(&self.c)
    }

    fn select(candidate: &Candidate) -> Selection {
        Selection {
            position_id: candidate.position_id,
            candidate_id: candidate.id,
        }
    }
}
