use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use mongodb::{
    bson::{doc, from_document, Document},
    options::{FindOptions, SessionOptions},
    Client, ClientSession, Database,
};
use rocket::{
    futures::TryStreamExt,
    outcome::try_outcome,
    request::{self, FromRequest, Request},
    State,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    model::{
        api::{
            election::{ElectionDescription, ElectionSummary},
            id::ApiId,
        },
        ballot::BallotError,
        common::election::ElectionStatus,
        db::{
            candidate::Candidate,
            election::Election,
            position::Position,
            vote::{BallotMarker, Vote},
            voter::Voter,
        },
        mongodb::{Coll, Id},
    },
};

/// One candidate's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyEntry {
    pub position_id: ApiId,
    pub position: String,
    pub candidate_id: ApiId,
    pub candidate: String,
    pub party: String,
    pub vote_count: u64,
}

/// How many days of participation the dashboard shows, today included.
pub const PARTICIPATION_DAYS: i64 = 7;

/// How many elections the dashboard lists.
pub const RECENT_ELECTIONS: usize = 5;

/// Ballots cast on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyBallots {
    pub date: NaiveDate,
    pub ballots: u64,
}

/// Headline numbers for the admin dashboard. Days are UTC days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_elections: u64,
    pub active_elections: u64,
    pub total_voters: u64,
    /// Distinct voters who cast a ballot today.
    pub votes_today: u64,
    /// Percentage of voters who have cast at least one ballot, to two
    /// decimal places.
    pub participation_rate: f64,
    /// Ballots cast on each recent day, oldest first, including days with
    /// none.
    pub participation: Vec<DailyBallots>,
    /// The most recently started elections, latest first.
    pub recent_elections: Vec<ElectionSummary>,
}

/// `part` as a percentage of `total`, rounded to two decimal places.
pub fn participation_rate(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 10_000.0).round() / 100.0
}

/// One entry per day for the [`PARTICIPATION_DAYS`] days ending `today`.
pub fn daily_participation(today: NaiveDate, counts: &HashMap<NaiveDate, u64>) -> Vec<DailyBallots> {
    (0..PARTICIPATION_DAYS)
        .rev()
        .map(|days_ago| {
            let date = today - Duration::days(days_ago);
            DailyBallots {
                date,
                ballots: counts.get(&date).copied().unwrap_or(0),
            }
        })
        .collect()
}

/// Midnight UTC at the start of `date`.
fn start_of(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

/// Output of a `$group` stage counting ballots per day.
#[derive(Debug, Deserialize)]
struct DayCount {
    #[serde(rename = "_id")]
    day: String,
    count: i64,
}

/// Output of a `$group` stage counting votes.
#[derive(Debug, Deserialize)]
struct GroupCount {
    #[serde(rename = "_id")]
    key: Id,
    count: i64,
}

/// Combine candidates, their positions and their vote counts into ordered
/// results.
///
/// Every candidate appears, with 0 if nobody voted for them. Results are
/// grouped by position in ID order (i.e. creation order); within a position
/// the highest count comes first and ties go to the lower candidate ID, so
/// repeated tallies of the same votes always agree.
pub fn rank(
    positions: &[Position],
    candidates: Vec<Candidate>,
    counts: &HashMap<Id, u64>,
) -> Vec<TallyEntry> {
    let position_names: HashMap<Id, &str> = positions
        .iter()
        .map(|position| (position.id, position.name.as_str()))
        .collect();

    let mut ranked: Vec<(Id, Id, TallyEntry)> = candidates
        .into_iter()
        .map(|candidate| {
            let (position_id, candidate_id) = (candidate.position_id, candidate.id);
            let position = position_names
                .get(&position_id)
                .map(|name| name.to_string())
                .unwrap_or_else(|| position_id.to_string());
            let entry = TallyEntry {
                position_id: position_id.into(),
                position,
                candidate_id: candidate_id.into(),
                party: candidate.party_or_independent().to_string(),
                vote_count: counts.get(&candidate_id).copied().unwrap_or(0),
                candidate: candidate.candidate.name,
            };
            (position_id, candidate_id, entry)
        })
        .collect();

    ranked.sort_by(|(pos_a, id_a, a), (pos_b, id_b, b)| {
        pos_a
            .cmp(pos_b)
            .then(b.vote_count.cmp(&a.vote_count))
            .then(id_a.cmp(id_b))
    });
    ranked.into_iter().map(|(_, _, entry)| entry).collect()
}

/// Read-only access to election results.
///
/// Every read goes through a snapshot session, so a tally sees either all
/// or none of any ballot the ledger commits.
pub struct Tally {
    client: Client,
    elections: Coll<Election>,
    positions: Coll<Position>,
    candidates: Coll<Candidate>,
    votes: Coll<Vote>,
    markers: Coll<BallotMarker>,
    voters: Coll<Voter>,
}

impl Tally {
    pub fn new(client: Client, db: &Database) -> Self {
        Self {
            client,
            elections: Coll::from_db(db),
            positions: Coll::from_db(db),
            candidates: Coll::from_db(db),
            votes: Coll::from_db(db),
            markers: Coll::from_db(db),
            voters: Coll::from_db(db),
        }
    }

    async fn snapshot_session(&self) -> mongodb::error::Result<ClientSession> {
        let options = SessionOptions::builder().snapshot(true).build();
        self.client.start_session(options).await
    }

    /// Per-candidate vote counts for an election, ordered as by [`rank`].
    pub async fn tally(&self, election_id: Id) -> Result<Vec<TallyEntry>> {
        let mut session = self.snapshot_session().await?;

        self.elections
            .find_one_with_session(election_id.as_doc(), None, &mut session)
            .await?
            .ok_or(BallotError::ElectionNotFound(election_id))?;

        let candidates: Vec<Candidate> = self
            .candidates
            .find_with_session(doc! { "election_id": election_id }, None, &mut session)
            .await?
            .stream(&mut session)
            .try_collect()
            .await?;

        let position_ids: Vec<Id> = candidates.iter().map(|c| c.position_id).collect();
        let positions: Vec<Position> = self
            .positions
            .find_with_session(doc! { "_id": { "$in": position_ids } }, None, &mut session)
            .await?
            .stream(&mut session)
            .try_collect()
            .await?;

        let pipeline = [
            doc! { "$match": { "election_id": election_id } },
            doc! { "$group": { "_id": "$candidate_id", "count": { "$sum": 1 } } },
        ];
        let counts = self.count_votes(&mut session, pipeline).await?;

        Ok(rank(&positions, candidates, &counts))
    }

    /// All elections, newest first, with their current status and how many
    /// votes have been recorded in each.
    pub async fn election_summaries(&self) -> Result<Vec<ElectionSummary>> {
        let mut session = self.snapshot_session().await?;
        Ok(self.summaries(&mut session, Utc::now()).await?)
    }

    async fn summaries(
        &self,
        session: &mut ClientSession,
        now: DateTime<Utc>,
    ) -> mongodb::error::Result<Vec<ElectionSummary>> {
        let options = FindOptions::builder().sort(doc! { "_id": -1 }).build();
        let elections: Vec<Election> = self
            .elections
            .find_with_session(None, options, session)
            .await?
            .stream(session)
            .try_collect()
            .await?;

        let pipeline = [doc! { "$group": { "_id": "$election_id", "count": { "$sum": 1 } } }];
        let counts = self.count_votes(session, pipeline).await?;

        Ok(elections
            .into_iter()
            .map(|election| {
                let votes_count = counts.get(&election.id).copied().unwrap_or(0);
                ElectionSummary {
                    election: ElectionDescription::at(election, now),
                    votes_count,
                }
            })
            .collect())
    }

    /// Election, voter and participation totals, all read from one snapshot.
    pub async fn dashboard(&self) -> Result<DashboardStats> {
        let mut session = self.snapshot_session().await?;
        let now = Utc::now();
        let today = now.date_naive();

        let mut elections = self.summaries(&mut session, now).await?;
        let active_elections = elections
            .iter()
            .filter(|summary| summary.election.status == ElectionStatus::Active)
            .count() as u64;
        let total_elections = elections.len() as u64;
        elections.sort_by(|a, b| b.election.start_time.cmp(&a.election.start_time));
        elections.truncate(RECENT_ELECTIONS);

        let total_voters = self
            .voters
            .count_documents_with_session(None, None, &mut session)
            .await?;
        let voted = self
            .markers
            .distinct_with_session("voter_id", None, None, &mut session)
            .await?
            .len() as u64;
        let votes_today = self
            .markers
            .distinct_with_session(
                "voter_id",
                doc! { "cast_at": { "$gte": start_of(today) } },
                None,
                &mut session,
            )
            .await?
            .len() as u64;

        let first_day = today - Duration::days(PARTICIPATION_DAYS - 1);
        let per_day = self.ballots_per_day(&mut session, first_day).await?;

        Ok(DashboardStats {
            total_elections,
            active_elections,
            total_voters,
            votes_today,
            participation_rate: participation_rate(voted, total_voters),
            participation: daily_participation(today, &per_day),
            recent_elections: elections,
        })
    }

    /// Ballots cast on each day from `since` onwards, by UTC date.
    async fn ballots_per_day(
        &self,
        session: &mut ClientSession,
        since: NaiveDate,
    ) -> mongodb::error::Result<HashMap<NaiveDate, u64>> {
        let pipeline = [
            doc! { "$match": { "cast_at": { "$gte": start_of(since) } } },
            doc! {
                "$group": {
                    "_id": { "$dateToString": { "format": "%Y-%m-%d", "date": "$cast_at" } },
                    "count": { "$sum": 1 },
                }
            },
        ];
        let groups: Vec<Document> = self
            .markers
            .aggregate_with_session(pipeline, None, session)
            .await?
            .stream(session)
            .try_collect()
            .await?;

        let mut per_day = HashMap::with_capacity(groups.len());
        for group in groups {
            let DayCount { day, count } = from_document(group)?;
            if let Ok(date) = NaiveDate::parse_from_str(&day, "%Y-%m-%d") {
                per_day.insert(date, count.max(0) as u64);
            }
        }
        Ok(per_day)
    }

    /// Run a vote-counting aggregation and collect its groups by key.
    async fn count_votes(
        &self,
        session: &mut ClientSession,
        pipeline: impl IntoIterator<Item = Document>,
    ) -> mongodb::error::Result<HashMap<Id, u64>> {
        let groups: Vec<Document> = self
            .votes
            .aggregate_with_session(pipeline, None, session)
            .await?
            .stream(session)
            .try_collect()
            .await?;

        let mut counts = HashMap::with_capacity(groups.len());
        for group in groups {
            let GroupCount { key, count } = from_document(group)?;
            counts.insert(key, count.max(0) as u64);
        }
        Ok(counts)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Tally {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let client = try_outcome!(req.guard::<&State<Client>>().await);
        let db = try_outcome!(req.guard::<&State<Database>>().await);
        request::Outcome::Success(Self::new(Client::clone(client), db))
    }
}
