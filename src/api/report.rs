use rocket::{serde::json::Json, Route};

use crate::{
    error::Result,
    model::{
        api::log::LogEntryDescription,
        audit::AuditLog,
        auth::AuthToken,
        db::admin::Admin,
        mongodb::Id,
        pagination::{Paginated, Pagination},
        tally::{DashboardStats, Tally, TallyEntry},
    },
};

pub fn routes() -> Vec<Route> {
    routes![election_tally, audit_logs, dashboard]
}

/// Vote counts for every candidate in an election.
#[get("/elections/<election_id>/tally")]
async fn election_tally(
    _token: AuthToken<Admin>,
    election_id: Id,
    tally: Tally,
) -> Result<Json<Vec<TallyEntry>>> {
    Ok(Json(tally.tally(election_id).await?))
}

/// The audit trail, newest first. `page_num` and `page_size` are read by
/// the [`Pagination`] guard.
#[get("/logs?<actor>")]
async fn audit_logs(
    _token: AuthToken<Admin>,
    actor: Option<Id>,
    pagination: Pagination,
    audit: AuditLog,
) -> Result<Json<Paginated<LogEntryDescription>>> {
    Ok(Json(audit.list(actor, pagination).await?))
}

/// Election and participation totals for the admin landing page.
#[get("/dashboard")]
async fn dashboard(_token: AuthToken<Admin>, tally: Tally) -> Result<Json<DashboardStats>> {
    Ok(Json(tally.dashboard().await?))
}

#[cfg(test)]
mod tests {
    use mongodb::Database;
    use rocket::{http::Status, local::asynchronous::Client, serde::json::serde_json};

    use crate::{
        model::{
            auth::Principal,
            db::{election::NewElection, voter::VoterCore},
            eligibility::EligibilityStore,
            fixtures::Fixture,
            ledger::Ledger,
            tally::PARTICIPATION_DAYS,
        },
        Config,
    };

    use super::*;

    #[backend_test(admin)]
    async fn tally_after_votes(client: Client, db: Database) {
        let fixture = Fixture::seed(&db).await;
        let mongo = crate::db_client().await.unwrap();
        let ledger = Ledger::new(mongo, &db, &Config::example());
        ledger
            .submit_ballot(
                fixture.principal(),
                fixture.election.id,
                &[fixture.select_b(), fixture.select_c()],
            )
            .await
            .unwrap();

        let response = client
            .get(uri!(election_tally(fixture.election.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let entries: Vec<TallyEntry> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        let counts: Vec<(&str, u64)> = entries
            .iter()
            .map(|e| (e.candidate.as_str(), e.vote_count))
            .collect();
        assert_eq!(counts, [("Brian", 1), ("Ada", 0), ("Carol", 1)]);
        assert_eq!(entries[2].party, "Independent");

        let response = client.get(uri!(election_tally(Id::new()))).dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test(admin)]
    async fn logs_filter_and_paginate(client: Client, db: Database) {
        let audit = AuditLog::from_db(&db);
        let someone = Principal::voter(Id::new());
        for n in 0..3 {
            audit
                .append(Some(someone), format!("Action {n}"), None)
                .await
                .unwrap();
        }

        audit.append(None, "System check", None).await.unwrap();

        let response = client.get("/logs").dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let page: Paginated<LogEntryDescription> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(page.pagination.total, 4);
        assert_eq!(page.items[0].action, "System check");
        assert_eq!(page.items[0].actor, None);

        let response = client
            .get(format!("/logs?actor={}&page_num=2&page_size=2", someone.id))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let page: Paginated<LogEntryDescription> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(page.pagination.total, 3);
        assert_eq!(page.pagination.page_num, 2);
        assert_eq!(page.items.len(), 1);
        // Oldest last.
        assert_eq!(page.items[0].action, "Action 0");

        // Far past the end is an empty page, not a crash.
        let response = client
            .get(format!("/logs?page_num={}", usize::MAX))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let page: Paginated<LogEntryDescription> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.pagination.total, 4);
    }

    #[backend_test(admin)]
    async fn dashboard_totals(client: Client, db: Database) {
        let fixture = Fixture::seed(&db).await;
        let upcoming = fixture
            .insert_election(&db, NewElection::upcoming_example())
            .await;
        let mongo = client.rocket().state::<mongodb::Client>().unwrap().clone();
        EligibilityStore::new(mongo.clone(), &db)
            .register_voter(VoterCore::example2(), false)
            .await
            .unwrap();
        Ledger::new(mongo, &db, &Config::example())
            .submit_ballot(
                fixture.principal(),
                fixture.election.id,
                &[fixture.select_a(), fixture.select_c()],
            )
            .await
            .unwrap();

        let response = client.get(uri!(dashboard)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let stats: DashboardStats =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(stats.total_elections, 2);
        assert_eq!(stats.active_elections, 1);
        assert_eq!(stats.total_voters, 2);
        assert_eq!(stats.votes_today, 1);
        assert_eq!(stats.participation_rate, 50.0);

        // One ballot, however many positions it covered.
        assert_eq!(stats.participation.len(), PARTICIPATION_DAYS as usize);
        let today = stats.participation.last().unwrap();
        assert_eq!(today.date, chrono::Utc::now().date_naive());
        assert_eq!(today.ballots, 1);
        let total: u64 = stats.participation.iter().map(|d| d.ballots).sum();
        assert_eq!(total, 1);

        // Latest start first.
        assert_eq!(*stats.recent_elections[0].election.id, upcoming);
        assert_eq!(*stats.recent_elections[1].election.id, fixture.election.id);
        assert_eq!(stats.recent_elections[1].votes_count, 2);
    }

    #[backend_test(voter)]
    async fn dashboard_is_for_admins(client: Client) {
        let response = client.get(uri!(dashboard)).dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }
}
