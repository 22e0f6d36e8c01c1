use chrono::Utc;
use log::info;
use mongodb::bson::doc;
use rocket::{futures::TryStreamExt, serde::json::Json, Route};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            candidate::BallotPage,
            election::{ElectionDescription, ElectionSpec, ElectionSummary},
        },
        audit::AuditLog,
        auth::AuthToken,
        common::election::ElectionStatus,
        db::{
            admin::Admin,
            election::{Election, NewElection},
            position::Position,
            voter::Voter,
        },
        eligibility::EligibilityStore,
        mongodb::{Coll, Id},
        tally::Tally,
    },
};

pub fn routes() -> Vec<Route> {
    routes![
        list_elections_admin,
        list_elections_voter,
        create_election,
        modify_election,
        delete_election,
        ballot_page,
    ]
}

/// Every election, with vote counts.
#[get("/elections", rank = 1)]
async fn list_elections_admin(
    _token: AuthToken<Admin>,
    tally: Tally,
) -> Result<Json<Vec<ElectionSummary>>> {
    Ok(Json(tally.election_summaries().await?))
}

/// Only the elections a voter can currently vote in.
#[get("/elections", rank = 2)]
async fn list_elections_voter(
    _token: AuthToken<Voter>,
    elections: Coll<Election>,
) -> Result<Json<Vec<ElectionDescription>>> {
    let now = Utc::now();
    let filter = doc! {
        "start_time": { "$lte": now },
        "end_time": { "$gte": now },
    };
    let active: Vec<ElectionDescription> = elections
        .find(filter, None)
        .await?
        .map_ok(|election| ElectionDescription::at(election, now))
        .try_filter(|election| std::future::ready(election.status == ElectionStatus::Active))
        .try_collect()
        .await?;
    Ok(Json(active))
}

#[post("/elections", data = "<spec>", format = "json")]
async fn create_election(
    token: AuthToken<Admin>,
    spec: Json<ElectionSpec>,
    elections: Coll<Election>,
    audit: AuditLog,
) -> Result<Json<ElectionDescription>> {
    let election = Election {
        id: Id::new(),
        election: NewElection::try_from(spec.0)?,
    };
    elections.insert_one(&election, None).await?;

    info!("Created election {} ({})", election.id, election.name);
    audit
        .append(
            Some(token.principal()),
            format!("Created election: {}", election.name),
            None,
        )
        .await?;
    Ok(Json(election.into()))
}

/// Elections can only be changed until the first vote is recorded.
#[put("/elections/<election_id>", data = "<spec>", format = "json")]
async fn modify_election(
    token: AuthToken<Admin>,
    election_id: Id,
    spec: Json<ElectionSpec>,
    store: EligibilityStore,
    audit: AuditLog,
) -> Result<Json<ElectionDescription>> {
    let new_election = NewElection::try_from(spec.0)?;
    let election = store.modify_election(election_id, &new_election).await?;

    info!("Modified election {election_id}");
    audit
        .append(
            Some(token.principal()),
            format!("Modified election: {}", election.name),
            None,
        )
        .await?;
    Ok(Json(election.into()))
}

/// Deleting an election also deletes its candidates. Elections with votes
/// are never deleted.
#[delete("/elections/<election_id>")]
async fn delete_election(
    token: AuthToken<Admin>,
    election_id: Id,
    store: EligibilityStore,
    audit: AuditLog,
) -> Result<()> {
    let election = store.delete_election(election_id).await?;

    audit
        .append(
            Some(token.principal()),
            format!("Deleted election: {}", election.name),
            None,
        )
        .await?;
    Ok(())
}

/// The positions and candidates a voter chooses between.
#[get("/elections/<election_id>/ballot")]
async fn ballot_page(
    _token: AuthToken<Voter>,
    election_id: Id,
    store: EligibilityStore,
    positions: Coll<Position>,
) -> Result<Json<BallotPage>> {
    let election = store
        .election(election_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {election_id}")))?;

    let candidates = store.candidates(election_id).await?;
    let position_ids: Vec<Id> = candidates.iter().map(|c| c.position_id).collect();
    let positions: Vec<Position> = positions
        .find(doc! { "_id": { "$in": position_ids } }, None)
        .await?
        .try_collect()
        .await?;

    Ok(Json(BallotPage::new(election.into(), positions, candidates)))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use mongodb::Database;
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::{Client, LocalResponse},
        serde::json::serde_json,
    };

    use crate::{
        model::{db::candidate::Candidate, fixtures::Fixture, ledger::Ledger},
        Config,
    };

    use super::*;

    async fn create<'a>(client: &'a Client, spec: &ElectionSpec) -> LocalResponse<'a> {
        client
            .post(uri!(create_election))
            .header(ContentType::JSON)
            .body(serde_json::to_string(spec).unwrap())
            .dispatch()
            .await
    }

    #[backend_test(admin)]
    async fn create_and_list(client: Client, elections: Coll<Election>) {
        let response = create(&client, &ElectionSpec::active_example()).await;
        assert_eq!(Status::Ok, response.status());
        let created: ElectionDescription =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(created.status, ElectionStatus::Active);

        let stored = elections
            .find_one(created.id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.name, ElectionSpec::active_example().name);

        let response = client.get(uri!(list_elections_admin)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let summaries: Vec<ElectionSummary> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].election, created);
        assert_eq!(summaries[0].votes_count, 0);
    }

    #[backend_test(admin)]
    async fn invalid_spec_is_unprocessable(client: Client, elections: Coll<Election>) {
        let mut spec = ElectionSpec::active_example();
        spec.end_time = spec.start_time - Duration::hours(1);
        let response = create(&client, &spec).await;
        assert_eq!(Status::UnprocessableEntity, response.status());

        let count = elections.count_documents(None, None).await.unwrap();
        assert_eq!(count, 0);
    }

    #[backend_test(admin)]
    async fn elections_with_votes_are_frozen(
        client: Client,
        db: Database,
        elections: Coll<Election>,
        candidates: Coll<Candidate>,
    ) {
        let fixture = Fixture::seed(&db).await;
        let mongo = client.rocket().state::<mongodb::Client>().unwrap().clone();
        Ledger::new(mongo, &db, &Config::example())
            .submit_ballot(fixture.principal(), fixture.election.id, &[fixture.select_a()])
            .await
            .unwrap();

        let stored = elections
            .find_one(fixture.election.id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.ballots_cast, 1);

        let response = client
            .put(uri!(modify_election(fixture.election.id)))
            .header(ContentType::JSON)
            .body(serde_json::to_string(&ElectionSpec::active_example()).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());

        let response = client
            .delete(uri!(delete_election(fixture.election.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());

        // Untouched, candidates included.
        let after = elections
            .find_one(fixture.election.id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after, stored);
        assert_eq!(candidates.count_documents(None, None).await.unwrap(), 3);
    }

    #[backend_test(admin)]
    async fn modify_and_delete(
        client: Client,
        db: Database,
        elections: Coll<Election>,
        candidates: Coll<Candidate>,
    ) {
        let fixture = Fixture::seed(&db).await;

        let mut spec = ElectionSpec::active_example();
        spec.name = "Renamed".to_string();
        let response = client
            .put(uri!(modify_election(fixture.election.id)))
            .header(ContentType::JSON)
            .body(serde_json::to_string(&spec).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let stored = elections
            .find_one(fixture.election.id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.name, "Renamed");

        let response = client
            .delete(uri!(delete_election(fixture.election.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(elections.count_documents(None, None).await.unwrap(), 0);
        assert_eq!(candidates.count_documents(None, None).await.unwrap(), 0);

        // Now it's gone, so there is nothing to delete or modify.
        let response = client
            .delete(uri!(delete_election(fixture.election.id)))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
        let response = client
            .put(uri!(modify_election(fixture.election.id)))
            .header(ContentType::JSON)
            .body(serde_json::to_string(&spec).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
        assert_eq!(elections.count_documents(None, None).await.unwrap(), 0);
    }

    #[backend_test(voter)]
    async fn voter_sees_active_elections_and_ballot(client: Client, db: Database) {
        let fixture = Fixture::seed(&db).await;
        fixture
            .insert_election(&db, NewElection::upcoming_example())
            .await;
        fixture
            .insert_election(&db, NewElection::completed_example())
            .await;

        let response = client.get(uri!(list_elections_voter)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let active: Vec<ElectionDescription> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(*active[0].id, fixture.election.id);

        let response = client
            .get(uri!(ballot_page(fixture.election.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let page: BallotPage = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(page.positions.len(), 2);
        assert_eq!(page.positions[0].name, "President");
        assert_eq!(page.positions[0].candidates.len(), 2);
        assert_eq!(page.positions[1].candidates[0].party, "Independent");
    }

    #[backend_test(voter)]
    async fn voters_cannot_manage_elections(client: Client) {
        let response = create(&client, &ElectionSpec::active_example()).await;
        assert_eq!(Status::NotFound, response.status());
    }
}
