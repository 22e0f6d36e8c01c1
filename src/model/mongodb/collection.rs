use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    outcome::try_outcome,
    request::{self, FromRequest, Request},
    State,
};

use crate::model::db::{
    admin::{Admin, NewAdmin},
    candidate::{Candidate, NewCandidate},
    election::{Election, NewElection},
    log_entry::LogEntry,
    position::{NewPosition, Position},
    vote::{BallotMarker, Vote},
    voter::{NewVoter, NewVoterStatus, Voter, VoterStatus},
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = try_outcome!(req.guard::<&State<Database>>().await);
        request::Outcome::Success(Coll::from_db(db))
    }
}

// Admin collections
const ADMINS: &str = "admins";
impl MongoCollection for Admin {
    const NAME: &'static str = ADMINS;
}
impl MongoCollection for NewAdmin {
    const NAME: &'static str = ADMINS;
}

// Election collections
const ELECTIONS: &str = "elections";
impl MongoCollection for Election {
    const NAME: &'static str = ELECTIONS;
}
impl MongoCollection for NewElection {
    const NAME: &'static str = ELECTIONS;
}

// Position collections
const POSITIONS: &str = "positions";
impl MongoCollection for Position {
    const NAME: &'static str = POSITIONS;
}
impl MongoCollection for NewPosition {
    const NAME: &'static str = POSITIONS;
}

// Candidate collections
const CANDIDATES: &str = "candidates";
impl MongoCollection for Candidate {
    const NAME: &'static str = CANDIDATES;
}
impl MongoCollection for NewCandidate {
    const NAME: &'static str = CANDIDATES;
}

// Voter collections
const VOTERS: &str = "voters";
impl MongoCollection for Voter {
    const NAME: &'static str = VOTERS;
}
impl MongoCollection for NewVoter {
    const NAME: &'static str = VOTERS;
}

// Voter status collections
const VOTER_STATUSES: &str = "voter_statuses";
impl MongoCollection for VoterStatus {
    const NAME: &'static str = VOTER_STATUSES;
}
impl MongoCollection for NewVoterStatus {
    const NAME: &'static str = VOTER_STATUSES;
}

// Ballot marker collection: one document per (voter, election) that has been voted in.
const BALLOT_MARKERS: &str = "ballot_markers";
impl MongoCollection for BallotMarker {
    const NAME: &'static str = BALLOT_MARKERS;
}

// Vote collection
const VOTES: &str = "votes";
impl MongoCollection for Vote {
    const NAME: &'static str = VOTES;
}

// Audit log collection
const LOGS: &str = "logs";
impl MongoCollection for LogEntry {
    const NAME: &'static str = LOGS;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Admin collection.
    let admin_index = IndexModel::builder()
        .keys(doc! {"username": 1})
        .options(unique.clone())
        .build();
    Coll::<Admin>::from_db(db)
        .create_index(admin_index, None)
        .await?;

    // Voter collection.
    let voter_index = IndexModel::builder()
        .keys(doc! {"student_number": 1})
        .options(unique.clone())
        .build();
    Coll::<Voter>::from_db(db)
        .create_index(voter_index, None)
        .await?;

    // Voter status collection: strictly one status per voter.
    let status_index = IndexModel::builder()
        .keys(doc! {"voter_id": 1})
        .options(unique.clone())
        .build();
    Coll::<VoterStatus>::from_db(db)
        .create_index(status_index, None)
        .await?;

    // Position collection.
    let position_index = IndexModel::builder()
        .keys(doc! {"name": 1})
        .options(unique.clone())
        .build();
    Coll::<Position>::from_db(db)
        .create_index(position_index, None)
        .await?;

    // Candidate collection.
    let candidate_code_index = IndexModel::builder()
        .keys(doc! {"code": 1})
        .options(unique.clone())
        .build();
    let candidate_election_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "position_id": 1})
        .build();
    let candidates = Coll::<Candidate>::from_db(db);
    candidates.create_index(candidate_code_index, None).await?;
    candidates
        .create_index(candidate_election_index, None)
        .await?;

    // Ballot marker collection. This is what serialises concurrent
    // submissions from the same voter.
    let marker_index = IndexModel::builder()
        .keys(doc! {"voter_id": 1, "election_id": 1})
        .options(unique.clone())
        .build();
    Coll::<BallotMarker>::from_db(db)
        .create_index(marker_index, None)
        .await?;

    // Vote collection.
    let vote_index = IndexModel::builder()
        .keys(doc! {"voter_id": 1, "election_id": 1, "position_id": 1})
        .options(unique)
        .build();
    let tally_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "candidate_id": 1})
        .build();
    let votes = Coll::<Vote>::from_db(db);
    votes.create_index(vote_index, None).await?;
    votes.create_index(tally_index, None).await?;

    // Audit log collection.
    let recency_index = IndexModel::builder()
        .keys(doc! {"timestamp": -1, "_id": -1})
        .build();
    let actor_index = IndexModel::builder()
        .keys(doc! {"actor.id": 1, "timestamp": -1})
        .build();
    let logs = Coll::<LogEntry>::from_db(db);
    logs.create_index(recency_index, None).await?;
    logs.create_index(actor_index, None).await?;

    Ok(())
}
