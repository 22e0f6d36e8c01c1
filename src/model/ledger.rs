use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use mongodb::{
    error::{Error as DbError, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    options::{Acknowledgment, ReadConcern, TransactionOptions, WriteConcern},
    Client, ClientSession, Database,
};
use rand::Rng;
use rocket::{
    http::Status,
    outcome::try_outcome,
    request::{self, FromRequest, Request},
    tokio::time::{sleep, timeout},
    State,
};

use crate::{
    error::{Error, Result},
    model::{
        audit::AuditLog,
        auth::{Principal, Rights},
        ballot::{validate, BallotError, Selection, ValidatedBallot},
        db::vote::{BallotMarker, BallotMarkerCore, Vote, VoteCore},
        eligibility::EligibilityStore,
        mongodb::{is_duplicate_key_error, Coll, Id},
    },
    Config,
};

/// Audit action recorded when a ballot submission is rejected.
pub const VOTE_FAILED: &str = "Vote failed";

/// Records ballots.
///
/// A ballot is written as one transaction: a ballot marker, the election's
/// ballot count, one vote per selection, the voter's `voted` flag and an
/// audit entry. Either all of them commit or none do.
///
/// Two submissions from the same voter for the same election cannot both
/// commit, because both would insert the same ballot marker and the marker
/// collection has a unique `(voter_id, election_id)` index. Whichever loses
/// sees either a write conflict, which is retried and then fails
/// validation, or a duplicate key error. Both surface as
/// [`BallotError::AlreadyVoted`].
pub struct Ledger {
    client: Client,
    store: EligibilityStore,
    markers: Coll<BallotMarker>,
    votes: Coll<Vote>,
    audit: AuditLog,
    timeout: Duration,
    max_attempts: u32,
}

impl Ledger {
    pub fn new(client: Client, db: &Database, config: &Config) -> Self {
        Self {
            store: EligibilityStore::new(client.clone(), db),
            client,
            markers: Coll::from_db(db),
            votes: Coll::from_db(db),
            audit: AuditLog::from_db(db),
            timeout: config.ledger_timeout(),
            max_attempts: config.ledger_max_attempts(),
        }
    }

    /// Record `principal`'s ballot in an election, returning the committed
    /// votes.
    ///
    /// The principal must be a voter. Rejections are recorded in the audit
    /// log on a best-effort basis.
    pub async fn submit_ballot(
        &self,
        principal: Principal,
        election_id: Id,
        selections: &[Selection],
    ) -> Result<Vec<Vote>> {
        if !principal.permits(Rights::Voter) {
            return Err(Error::Status(
                Status::Forbidden,
                format!("{principal} may not cast ballots"),
            ));
        }

        let result = match timeout(self.timeout, self.submit(principal, election_id, selections)).await
        {
            Ok(result) => result,
            // The in-flight session was dropped with the future, which aborts
            // any open transaction.
            Err(_) => Err(Error::Status(
                Status::ServiceUnavailable,
                format!("Ballot submission timed out after {:?}", self.timeout),
            )),
        };

        match &result {
            Ok(votes) => info!(
                "Voter {} cast {} votes in election {election_id}",
                principal.id,
                votes.len()
            ),
            Err(err) => {
                warn!(
                    "Rejected ballot from voter {} in election {election_id}: {err}",
                    principal.id
                );
                self.record_failure(principal, election_id, err).await;
            }
        }
        result
    }

    async fn submit(
        &self,
        principal: Principal,
        election_id: Id,
        selections: &[Selection],
    ) -> Result<Vec<Vote>> {
        // Cheap pre-check so obviously bad ballots never open a transaction.
        {
            let mut session = self.store.start_session().await?;
            let snapshot = self
                .store
                .snapshot(&mut session, principal.id, election_id, selections)
                .await?;
            validate(principal.id, election_id, selections, &snapshot, Utc::now())?;
        }

        let mut attempt = 1;
        loop {
            match self.attempt(principal, election_id, selections).await {
                Ok(votes) => return Ok(votes),
                Err(Error::Db(err))
                    if err.contains_label(TRANSIENT_TRANSACTION_ERROR)
                        && attempt < self.max_attempts =>
                {
                    let delay = backoff(attempt);
                    debug!(
                        "Ballot transaction attempt {attempt} for voter {} failed transiently, retrying in {delay:?}: {err}",
                        principal.id
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(Error::Db(err)) => return Err(classify(err)),
                Err(err) => return Err(err),
            }
        }
    }

    /// One run of the transaction, from start to commit.
    async fn attempt(
        &self,
        principal: Principal,
        election_id: Id,
        selections: &[Selection],
    ) -> Result<Vec<Vote>> {
        let mut session = self.client.start_session(None).await?;
        let options = TransactionOptions::builder()
            .read_concern(ReadConcern::snapshot())
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            .max_commit_time(self.timeout)
            .build();
        session.start_transaction(options).await?;

        match self
            .write_ballot(&mut session, principal, election_id, selections)
            .await
        {
            Ok(votes) => {
                self.commit(&mut session).await?;
                Ok(votes)
            }
            Err(err) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    debug!("Failed to abort ballot transaction: {abort_err}");
                }
                Err(err)
            }
        }
    }

    /// Every write of a ballot, inside the session's transaction.
    async fn write_ballot(
        &self,
        session: &mut ClientSession,
        principal: Principal,
        election_id: Id,
        selections: &[Selection],
    ) -> Result<Vec<Vote>> {
        // Validate again against what this transaction sees, closing the gap
        // since the pre-check.
        let snapshot = self
            .store
            .snapshot(session, principal.id, election_id, selections)
            .await?;
        let ValidatedBallot {
            voter_id,
            election_id,
            selections,
        } = validate(principal.id, election_id, selections, &snapshot, Utc::now())?;
        let election_name = snapshot
            .election
            .map(|election| election.election.name)
            .unwrap_or_default();

        let cast_at = Utc::now();
        let marker = BallotMarker::new(BallotMarkerCore {
            voter_id,
            election_id,
            cast_at,
        });
        self.markers
            .insert_one_with_session(&marker, None, session)
            .await?;

        if !self.store.count_ballot(session, election_id).await? {
            return Err(BallotError::ElectionNotFound(election_id).into());
        }

        let mut votes = Vec::with_capacity(selections.len());
        for selection in selections {
            let vote = Vote::new(VoteCore {
                voter_id,
                candidate_id: selection.candidate_id,
                election_id,
                position_id: selection.position_id,
                created_at: cast_at,
            });
            self.votes
                .insert_one_with_session(&vote, None, session)
                .await?;
            votes.push(vote);
        }

        if !self.store.set_voted(session, voter_id).await? {
            return Err(BallotError::VoterNotActivated(voter_id).into());
        }

        self.audit
            .append_with_session(
                session,
                Some(principal),
                format!("Voted in election: {election_name}"),
                None,
            )
            .await?;

        Ok(votes)
    }

    /// Commit, retrying only the commit when its outcome is unknown.
    async fn commit(&self, session: &mut ClientSession) -> Result<()> {
        let mut attempt = 1;
        loop {
            match session.commit_transaction().await {
                Ok(()) => return Ok(()),
                Err(err)
                    if err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                        && attempt < self.max_attempts =>
                {
                    debug!("Ballot commit result unknown, retrying commit: {err}");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Write the failure audit entry outside of any transaction. A failure
    /// here is logged and otherwise ignored.
    async fn record_failure(&self, principal: Principal, election_id: Id, err: &Error) {
        let notes = format!("Election {election_id}: {err}");
        if let Err(log_err) = self
            .audit
            .append(Some(principal), VOTE_FAILED, Some(notes))
            .await
        {
            warn!(
                "Failed to record ballot rejection for voter {}: {log_err}",
                principal.id
            );
        }
    }
}

/// Map a database error that ended a ballot transaction to what the caller
/// should see.
fn classify(err: DbError) -> Error {
    if is_duplicate_key_error(&err) {
        BallotError::AlreadyVoted.into()
    } else if err.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        Error::Status(
            Status::ServiceUnavailable,
            "Too many concurrent writes, try again".to_string(),
        )
    } else {
        Error::Db(err)
    }
}

/// Exponential backoff with full jitter: up to 10ms, 20ms, 40ms, ...
pub(crate) fn backoff(attempt: u32) -> Duration {
    let ceiling = 10_u64 << attempt.saturating_sub(1).min(8);
    Duration::from_millis(rand::thread_rng().gen_range(1..=ceiling))
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Ledger {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let client = try_outcome!(req.guard::<&State<Client>>().await);
        let db = try_outcome!(req.guard::<&State<Database>>().await);
        let config = try_outcome!(req.guard::<&State<Config>>().await);
        request::Outcome::Success(Self::new(Client::clone(client), db, config))
    }
}
