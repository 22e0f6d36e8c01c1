use std::collections::HashMap;
use std::future::Future;

use log::{debug, info};
use mongodb::{
    bson::{doc, Document},
    error::{Result as DbResult, TRANSIENT_TRANSACTION_ERROR},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument, SessionOptions},
    Client, ClientSession, Database,
};
use rocket::{
    futures::TryStreamExt,
    http::Status,
    outcome::try_outcome,
    request::{self, FromRequest, Request},
    tokio::time::sleep,
    State,
};

use crate::{
    error::{Error, Result},
    model::{
        ballot::{EligibilitySnapshot, Selection},
        db::{
            candidate::Candidate,
            election::{Election, NewElection},
            vote::BallotMarker,
            voter::{NewVoter, NewVoterStatus, Voter, VoterStatus},
        },
        ledger::backoff,
        mongodb::{Coll, Id},
    },
};

/// How many times a deletion is attempted while ballot transactions hold
/// the records it removes.
const DELETE_ATTEMPTS: u32 = 4;

/// Run `op` again while it fails with a transient transaction error, giving
/// up with `409 Conflict` and the `busy` message after [`DELETE_ATTEMPTS`].
async fn retry_transient<T, F, Fut>(busy: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(Error::Db(err)) if err.contains_label(TRANSIENT_TRANSACTION_ERROR) => {
                if attempt >= DELETE_ATTEMPTS {
                    return Err(Error::Status(Status::Conflict, busy.to_string()));
                }
                debug!("Deletion attempt {attempt} conflicted, retrying: {err}");
                sleep(backoff(attempt)).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Matches an election only while no ballot has been counted in it.
fn unvoted(election_id: Id) -> Document {
    doc! { "_id": election_id, "ballots_cast": { "$not": { "$gt": 0 } } }
}

/// Read and write access to everything that decides whether a voter may
/// vote: elections, candidates, voters, their statuses and ballot markers.
///
/// Reads that feed the ledger take a session so they can run inside its
/// transaction.
pub struct EligibilityStore {
    client: Client,
    elections: Coll<Election>,
    candidates: Coll<Candidate>,
    voters: Coll<Voter>,
    statuses: Coll<VoterStatus>,
    markers: Coll<BallotMarker>,
}

impl EligibilityStore {
    pub fn new(client: Client, db: &Database) -> Self {
        Self {
            client,
            elections: Coll::from_db(db),
            candidates: Coll::from_db(db),
            voters: Coll::from_db(db),
            statuses: Coll::from_db(db),
            markers: Coll::from_db(db),
        }
    }

    pub async fn election(&self, election_id: Id) -> DbResult<Option<Election>> {
        self.elections.find_one(election_id.as_doc(), None).await
    }

    pub async fn voter(&self, voter_id: Id) -> DbResult<Option<Voter>> {
        self.voters.find_one(voter_id.as_doc(), None).await
    }

    pub async fn voter_by_student_number(&self, student_number: &str) -> DbResult<Option<Voter>> {
        let filter = doc! { "student_number": student_number };
        self.voters.find_one(filter, None).await
    }

    pub async fn voter_status(&self, voter_id: Id) -> DbResult<Option<VoterStatus>> {
        let filter = doc! { "voter_id": voter_id };
        self.statuses.find_one(filter, None).await
    }

    /// Has this voter cast a ballot in this election?
    pub async fn has_voted(&self, voter_id: Id, election_id: Id) -> DbResult<bool> {
        let filter = doc! { "voter_id": voter_id, "election_id": election_id };
        Ok(self.markers.find_one(filter, None).await?.is_some())
    }

    pub async fn candidate(&self, candidate_id: Id) -> DbResult<Option<Candidate>> {
        self.candidates.find_one(candidate_id.as_doc(), None).await
    }

    /// Every candidate standing in the given election.
    pub async fn candidates(&self, election_id: Id) -> DbResult<Vec<Candidate>> {
        let filter = doc! { "election_id": election_id };
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        self.candidates
            .find(filter, options)
            .await?
            .try_collect()
            .await
    }

    /// Read everything needed to validate a ballot, through `session`.
    ///
    /// Only the candidates the ballot names are loaded.
    pub async fn snapshot(
        &self,
        session: &mut ClientSession,
        voter_id: Id,
        election_id: Id,
        selections: &[Selection],
    ) -> DbResult<EligibilitySnapshot> {
        let election = self
            .elections
            .find_one_with_session(election_id.as_doc(), None, session)
            .await?;

        let status = self
            .statuses
            .find_one_with_session(doc! { "voter_id": voter_id }, None, session)
            .await?;

        let marker_filter = doc! { "voter_id": voter_id, "election_id": election_id };
        let already_voted = self
            .markers
            .find_one_with_session(marker_filter, None, session)
            .await?
            .is_some();

        let candidate_ids: Vec<Id> = selections.iter().map(|s| s.candidate_id).collect();
        let candidates: Vec<Candidate> = self
            .candidates
            .find_with_session(doc! { "_id": { "$in": candidate_ids } }, None, session)
            .await?
            .stream(session)
            .try_collect()
            .await?;

        Ok(EligibilitySnapshot {
            election,
            status,
            already_voted,
            candidates: candidates.into_iter().map(|c| (c.id, c)).collect(),
        })
    }

    /// Mark an activated voter as having voted.
    ///
    /// Returns `false` if no activated status matched, which the ledger
    /// treats as the voter having been deactivated mid-transaction.
    pub async fn set_voted(&self, session: &mut ClientSession, voter_id: Id) -> DbResult<bool> {
        let filter = doc! { "voter_id": voter_id, "activated": true };
        let update = doc! { "$set": { "voted": true } };
        let result = self
            .statuses
            .update_one_with_session(filter, update, None, session)
            .await?;
        Ok(result.matched_count == 1)
    }

    /// Count one more ballot against an election, inside the ballot's
    /// transaction.
    ///
    /// Returns `false` if the election no longer exists.
    pub async fn count_ballot(&self, session: &mut ClientSession, election_id: Id) -> DbResult<bool> {
        let update = doc! { "$inc": { "ballots_cast": 1_i64 } };
        let result = self
            .elections
            .update_one_with_session(election_id.as_doc(), update, None, session)
            .await?;
        Ok(result.matched_count == 1)
    }

    /// Change an election's name and window, as long as no ballot has been
    /// counted in it.
    ///
    /// A ballot transaction in flight holds the election document, so this
    /// waits for it and then sees its count.
    pub async fn modify_election(&self, election_id: Id, election: &NewElection) -> Result<Election> {
        let update = doc! {
            "$set": {
                "name": &election.name,
                "start_time": election.start_time,
                "end_time": election.end_time,
            }
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        match self
            .elections
            .find_one_and_update(unvoted(election_id), update, options)
            .await?
        {
            Some(election) => Ok(election),
            None => Err(self.refusal(election_id, "modify").await),
        }
    }

    /// Delete an election and its candidates together, as long as no ballot
    /// has been counted in it. Returns the deleted election.
    pub async fn delete_election(&self, election_id: Id) -> Result<Election> {
        let busy = format!("Election {election_id} is being voted in, try again");
        retry_transient(&busy, move || self.try_delete_election(election_id)).await
    }

    async fn try_delete_election(&self, election_id: Id) -> Result<Election> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;

        match self.remove_election(&mut session, election_id).await {
            Ok(Some(election)) => {
                session.commit_transaction().await?;
                info!("Deleted election {election_id}");
                Ok(election)
            }
            Ok(None) => {
                session.abort_transaction().await?;
                Err(self.refusal(election_id, "delete").await)
            }
            Err(err) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    debug!("Failed to abort election deletion: {abort_err}");
                }
                Err(err.into())
            }
        }
    }

    async fn remove_election(
        &self,
        session: &mut ClientSession,
        election_id: Id,
    ) -> DbResult<Option<Election>> {
        let election = self
            .elections
            .find_one_and_delete_with_session(unvoted(election_id), None, session)
            .await?;
        if election.is_some() {
            self.candidates
                .delete_many_with_session(doc! { "election_id": election_id }, None, session)
                .await?;
        }
        Ok(election)
    }

    /// Why a guarded election change matched nothing.
    async fn refusal(&self, election_id: Id, action: &str) -> Error {
        match self.election(election_id).await {
            Ok(Some(_)) => Error::Status(
                Status::Conflict,
                format!("Cannot {action} election {election_id} once votes have been cast"),
            ),
            Ok(None) => Error::not_found(format!("Election {election_id}")),
            Err(err) => err.into(),
        }
    }

    /// Delete a voter and their status together, as long as they have not
    /// voted. Returns the deleted voter.
    pub async fn delete_voter(&self, voter_id: Id) -> Result<Voter> {
        let busy = format!("Voter {voter_id} is casting a ballot, try again");
        retry_transient(&busy, move || self.try_delete_voter(voter_id)).await
    }

    async fn try_delete_voter(&self, voter_id: Id) -> Result<Voter> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;

        match self.remove_voter(&mut session, voter_id).await {
            Ok(Some(voter)) => {
                session.commit_transaction().await?;
                info!("Deleted voter {voter_id} ({})", voter.student_number);
                Ok(voter)
            }
            Ok(None) => {
                session.abort_transaction().await?;
                Err(match self.voter(voter_id).await? {
                    Some(_) => Error::Status(
                        Status::Conflict,
                        format!("Cannot delete voter {voter_id} after they have voted"),
                    ),
                    None => Error::not_found(format!("Voter {voter_id}")),
                })
            }
            Err(err) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    debug!("Failed to abort voter deletion: {abort_err}");
                }
                Err(err.into())
            }
        }
    }

    /// Removing the status first means a ballot transaction for this voter
    /// either conflicts or finds them no longer activated.
    async fn remove_voter(
        &self,
        session: &mut ClientSession,
        voter_id: Id,
    ) -> DbResult<Option<Voter>> {
        let unvoted = doc! { "voter_id": voter_id, "voted": false };
        let status = self
            .statuses
            .find_one_and_delete_with_session(unvoted, None, session)
            .await?;
        if status.is_none() {
            return Ok(None);
        }
        self.voters
            .find_one_and_delete_with_session(voter_id.as_doc(), None, session)
            .await
    }

    /// Every voter matching `search` (see `VoterCore::matches`), by student
    /// number, with their status if they have one.
    pub async fn voters(&self, search: Option<&str>) -> DbResult<Vec<(Voter, Option<VoterStatus>)>> {
        let options = FindOptions::builder()
            .sort(doc! { "student_number": 1 })
            .build();
        let voters: Vec<Voter> = self
            .voters
            .find(None, options)
            .await?
            .try_filter(|voter| std::future::ready(voter.matches(search.unwrap_or_default())))
            .try_collect()
            .await?;

        let voter_ids: Vec<Id> = voters.iter().map(|v| v.id).collect();
        let mut statuses: HashMap<Id, VoterStatus> = self
            .statuses
            .find(doc! { "voter_id": { "$in": voter_ids } }, None)
            .await?
            .map_ok(|status| (status.voter_id, status))
            .try_collect()
            .await?;

        Ok(voters
            .into_iter()
            .map(|voter| {
                let status = statuses.remove(&voter.id);
                (voter, status)
            })
            .collect())
    }

    /// Insert a voter record, returning it with its new ID.
    pub async fn create_voter(
        &self,
        session: &mut ClientSession,
        voter: NewVoter,
    ) -> DbResult<Voter> {
        let voter = Voter {
            id: Id::new(),
            voter,
        };
        self.voters
            .insert_one_with_session(&voter, None, session)
            .await?;
        Ok(voter)
    }

    /// Insert the status record for an existing voter.
    pub async fn create_voter_status(
        &self,
        session: &mut ClientSession,
        status: NewVoterStatus,
    ) -> DbResult<VoterStatus> {
        let status = VoterStatus {
            id: Id::new(),
            status,
        };
        self.statuses
            .insert_one_with_session(&status, None, session)
            .await?;
        Ok(status)
    }

    /// Create a voter and their status together, so neither exists without
    /// the other. A duplicate student number fails with a duplicate key
    /// error and leaves nothing behind.
    pub async fn register_voter(&self, voter: NewVoter, activated: bool) -> DbResult<Voter> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;

        let voter = self.create_voter(&mut session, voter).await?;
        self.create_voter_status(&mut session, NewVoterStatus::new(voter.id, activated))
            .await?;

        session.commit_transaction().await?;
        debug!("Registered voter {} ({})", voter.id, voter.student_number);
        Ok(voter)
    }

    /// Activate a single voter.
    pub async fn activate(&self, voter_id: Id) -> Result<VoterStatus> {
        let status = self
            .voter_status(voter_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Status for voter {voter_id}")))?;
        if status.activated {
            return Err(Error::Status(
                Status::Conflict,
                format!("Voter {voter_id} is already activated"),
            ));
        }

        let filter = doc! { "_id": status.id, "activated": false };
        let update = doc! { "$set": { "activated": true } };
        let result = self.statuses.update_one(filter, update, None).await?;
        if result.modified_count == 0 {
            // Someone else activated them between the read and the write.
            return Err(Error::Status(
                Status::Conflict,
                format!("Voter {voter_id} is already activated"),
            ));
        }

        info!("Activated voter {voter_id}");
        let mut status = status;
        status.activated = true;
        Ok(status)
    }

    /// Every voter whose status is not activated and who matches `search`
    /// (see `VoterCore::matches`), by student number.
    pub async fn inactive_voters(&self, search: Option<&str>) -> DbResult<Vec<Voter>> {
        let statuses: Vec<VoterStatus> = self
            .statuses
            .find(doc! { "activated": false }, None)
            .await?
            .try_collect()
            .await?;
        let voter_ids: Vec<Id> = statuses.iter().map(|s| s.voter_id).collect();
        let options = FindOptions::builder()
            .sort(doc! { "student_number": 1 })
            .build();
        self.voters
            .find(doc! { "_id": { "$in": voter_ids } }, options)
            .await?
            .try_filter(|voter| std::future::ready(voter.matches(search.unwrap_or_default())))
            .try_collect()
            .await
    }

    /// Activate every inactive voter, returning the IDs of those activated.
    ///
    /// Statuses are claimed one at a time with a conditional update, so a
    /// voter activated concurrently is neither double-counted nor missed.
    pub async fn activate_all(&self) -> Result<Vec<Id>> {
        let inactive: Vec<VoterStatus> = self
            .statuses
            .find(doc! { "activated": false }, None)
            .await?
            .try_collect()
            .await?;
        if inactive.is_empty() {
            return Err(Error::not_found("Inactive voters".to_string()));
        }

        let mut activated = Vec::with_capacity(inactive.len());
        for status in inactive {
            let filter = doc! { "_id": status.id, "activated": false };
            let update = doc! { "$set": { "activated": true } };
            let result = self.statuses.update_one(filter, update, None).await?;
            if result.modified_count == 1 {
                activated.push(status.voter_id);
            }
        }

        info!("Activated {} voters", activated.len());
        Ok(activated)
    }

    /// A fresh session on the store's client, for reads outside a
    /// transaction.
    pub async fn start_session(&self) -> DbResult<ClientSession> {
        self.client
            .start_session(SessionOptions::builder().causal_consistency(true).build())
            .await
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for EligibilityStore {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let client = try_outcome!(req.guard::<&State<Client>>().await);
        let db = try_outcome!(req.guard::<&State<Database>>().await);
        request::Outcome::Success(Self::new(Client::clone(client), db))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mongodb::Database;
    use rocket::{local::asynchronous::Client, tokio};

    use crate::model::{
        db::{vote::BallotMarkerCore, voter::VoterCore},
        fixtures::Fixture,
        mongodb::{is_duplicate_key_error, Coll},
    };

    use super::*;

    fn store(client: &Client, db: &Database) -> EligibilityStore {
        let mongo = client.rocket().state::<mongodb::Client>().unwrap();
        EligibilityStore::new(mongo.clone(), db)
    }

    #[backend_test]
    async fn register_voter_creates_voter_and_status(client: Client, db: Database) {
        let store = store(&client, &db);
        let voter = store
            .register_voter(VoterCore::example2(), false)
            .await
            .unwrap();

        let status = store.voter_status(voter.id).await.unwrap().unwrap();
        assert!(!status.activated);
        assert!(!status.voted);

        let found = store
            .voter_by_student_number(&voter.student_number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, voter);
    }

    #[backend_test]
    async fn duplicate_student_number_leaves_nothing_behind(
        client: Client,
        db: Database,
        statuses: Coll<VoterStatus>,
    ) {
        let store = store(&client, &db);
        store
            .register_voter(VoterCore::example2(), true)
            .await
            .unwrap();

        let err = store
            .register_voter(VoterCore::example2(), true)
            .await
            .unwrap_err();
        assert!(is_duplicate_key_error(&err));

        // Only the first registration's status exists.
        let count = statuses.count_documents(None, None).await.unwrap();
        assert_eq!(count, 1);
    }

    #[backend_test]
    async fn activation(client: Client, db: Database) {
        let store = store(&client, &db);
        let voter = store
            .register_voter(VoterCore::example2(), false)
            .await
            .unwrap();
        assert_eq!(store.inactive_voters(None).await.unwrap(), vec![voter.clone()]);

        let status = store.activate(voter.id).await.unwrap();
        assert!(status.activated);
        assert!(store.inactive_voters(None).await.unwrap().is_empty());

        // Activating twice is a conflict, and unknown voters are not found.
        let err = store.activate(voter.id).await.unwrap_err();
        assert!(matches!(err, Error::Status(s, _) if s == Status::Conflict));
        let err = store.activate(Id::new()).await.unwrap_err();
        assert!(matches!(err, Error::Status(s, _) if s == Status::NotFound));

        // Nobody left to bulk activate.
        let err = store.activate_all().await.unwrap_err();
        assert!(matches!(err, Error::Status(s, _) if s == Status::NotFound));
    }

    #[backend_test]
    async fn snapshot_reads_only_named_candidates(client: Client, db: Database) {
        let store = store(&client, &db);
        let fixture = Fixture::seed(&db).await;

        let mut session = store.start_session().await.unwrap();
        let snapshot = store
            .snapshot(
                &mut session,
                fixture.voter.id,
                fixture.election.id,
                &[fixture.select_a()],
            )
            .await
            .unwrap();

        assert_eq!(snapshot.election.as_ref(), Some(&fixture.election));
        assert!(snapshot.status.unwrap().activated);
        assert!(!snapshot.already_voted);
        assert_eq!(snapshot.candidates.len(), 1);
        assert!(snapshot.candidates.contains_key(&fixture.a.id));
    }

    #[backend_test]
    async fn has_voted_follows_ballot_markers(
        client: Client,
        db: Database,
        markers: Coll<BallotMarker>,
    ) {
        let store = store(&client, &db);
        let fixture = Fixture::seed(&db).await;

        let candidate = store.candidate(fixture.a.id).await.unwrap().unwrap();
        assert_eq!(candidate, fixture.a);
        assert!(store.candidate(Id::new()).await.unwrap().is_none());

        assert!(!store
            .has_voted(fixture.voter.id, fixture.election.id)
            .await
            .unwrap());
        let marker = BallotMarker::new(BallotMarkerCore {
            voter_id: fixture.voter.id,
            election_id: fixture.election.id,
            cast_at: chrono::Utc::now(),
        });
        markers.insert_one(&marker, None).await.unwrap();
        assert!(store
            .has_voted(fixture.voter.id, fixture.election.id)
            .await
            .unwrap());
        // Only for that election.
        assert!(!store.has_voted(fixture.voter.id, Id::new()).await.unwrap());
    }

    #[backend_test]
    async fn set_voted_requires_activation(client: Client, db: Database) {
        let store = store(&client, &db);
        let inactive = store
            .register_voter(VoterCore::example2(), false)
            .await
            .unwrap();

        let mut session = store.start_session().await.unwrap();
        assert!(!store.set_voted(&mut session, inactive.id).await.unwrap());

        store.activate(inactive.id).await.unwrap();
        assert!(store.set_voted(&mut session, inactive.id).await.unwrap());
        let status = store.voter_status(inactive.id).await.unwrap().unwrap();
        assert!(status.voted);
    }

    fn status_of<T>(result: Result<T>) -> Status {
        match result {
            Ok(_) => Status::Ok,
            Err(err) => err.status(),
        }
    }

    #[backend_test]
    async fn counted_ballots_freeze_the_election(client: Client, db: Database) {
        let store = store(&client, &db);
        let fixture = Fixture::seed(&db).await;
        let id = fixture.election.id;

        let mut renamed = NewElection::active_example();
        renamed.name = "Renamed".to_string();
        let modified = store.modify_election(id, &renamed).await.unwrap();
        assert_eq!(modified.name, "Renamed");
        assert_eq!(modified.start_time, renamed.start_time);

        let mut session = store.start_session().await.unwrap();
        assert!(store.count_ballot(&mut session, id).await.unwrap());
        assert!(!store.count_ballot(&mut session, Id::new()).await.unwrap());

        assert_eq!(status_of(store.modify_election(id, &renamed).await), Status::Conflict);
        assert_eq!(status_of(store.delete_election(id).await), Status::Conflict);
        assert_eq!(store.election(id).await.unwrap().unwrap().ballots_cast, 1);
        assert_eq!(store.candidates(id).await.unwrap().len(), 3);

        assert_eq!(status_of(store.delete_election(Id::new()).await), Status::NotFound);
    }

    #[backend_test]
    async fn election_changes_wait_for_ballot_in_flight(client: Client, db: Database) {
        let store = store(&client, &db);
        let fixture = Fixture::seed(&db).await;
        let id = fixture.election.id;

        // A ballot transaction that has counted itself but not yet committed.
        let mut ballot = store.start_session().await.unwrap();
        ballot.start_transaction(None).await.unwrap();
        assert!(store.count_ballot(&mut ballot, id).await.unwrap());

        // Deleting conflicts with it rather than slipping in underneath.
        assert_eq!(status_of(store.delete_election(id).await), Status::Conflict);

        // Modifying waits for it to commit, then sees the count.
        let renamed = NewElection::active_example();
        let (modified, committed) = tokio::join!(store.modify_election(id, &renamed), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ballot.commit_transaction().await
        });
        committed.unwrap();
        assert_eq!(status_of(modified), Status::Conflict);

        let election = store.election(id).await.unwrap().unwrap();
        assert_eq!(election.ballots_cast, 1);
        assert_eq!(election.name, fixture.election.name);
        assert_eq!(store.candidates(id).await.unwrap().len(), 3);
    }

    #[backend_test]
    async fn voters_who_voted_are_never_deleted(client: Client, db: Database) {
        let store = store(&client, &db);
        let fixture = Fixture::seed(&db).await;
        let id = fixture.voter.id;

        // A ballot transaction that has marked the voter but not yet committed.
        let mut ballot = store.start_session().await.unwrap();
        ballot.start_transaction(None).await.unwrap();
        assert!(store.set_voted(&mut ballot, id).await.unwrap());

        assert_eq!(status_of(store.delete_voter(id).await), Status::Conflict);
        ballot.commit_transaction().await.unwrap();
        assert_eq!(status_of(store.delete_voter(id).await), Status::Conflict);
        assert!(store.voter(id).await.unwrap().is_some());
        assert!(store.voter_status(id).await.unwrap().unwrap().voted);

        let other = store
            .register_voter(VoterCore::example2(), true)
            .await
            .unwrap();
        let deleted = store.delete_voter(other.id).await.unwrap();
        assert_eq!(deleted, other);
        assert!(store.voter_status(other.id).await.unwrap().is_none());
        assert_eq!(status_of(store.delete_voter(other.id).await), Status::NotFound);
    }
}
