use log::info;
use rocket::{serde::json::Json, Route};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    model::{
        api::voter::{VoterDescription, VoterSpec},
        audit::AuditLog,
        auth::{AuthToken, Principal},
        db::admin::Admin,
        eligibility::EligibilityStore,
        mongodb::Id,
    },
};

pub fn routes() -> Vec<Route> {
    routes![
        list_voters,
        create_voter,
        delete_voter,
        activate_all_voters,
        activate_voter,
        list_inactive_voters
    ]
}

/// Result of a bulk activation.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActivatedCount {
    pub activated: usize,
}

/// Every voter, by student number, optionally narrowed by a search on
/// student number or name.
#[get("/voters?<search>")]
async fn list_voters(
    _token: AuthToken<Admin>,
    search: Option<String>,
    store: EligibilityStore,
) -> Result<Json<Vec<VoterDescription>>> {
    let voters = store
        .voters(search.as_deref())
        .await?
        .into_iter()
        .map(|(voter, status)| VoterDescription::with_status(voter, status.as_ref()))
        .collect();
    Ok(Json(voters))
}

/// Register a single voter. Admin-created voters start out inactive.
#[post("/voters", data = "<spec>", format = "json")]
async fn create_voter(
    token: AuthToken<Admin>,
    spec: Json<VoterSpec>,
    store: EligibilityStore,
    audit: AuditLog,
) -> Result<Json<VoterDescription>> {
    let new_voter = spec.0.into_voter()?;
    let student_number = new_voter.student_number.clone();
    let voter = store
        .register_voter(new_voter, false)
        .await
        .map_err(|err| {
            Error::conflict_on_duplicate(err, || {
                format!("Voter {student_number} already exists")
            })
        })?;

    info!("Created voter {} ({})", voter.id, voter.student_number);
    audit
        .append(
            Some(token.principal()),
            "Created voter",
            Some(format!("Student number: {}", voter.student_number)),
        )
        .await?;
    Ok(Json(VoterDescription::new(voter, false)))
}

/// Voters who have voted are never deleted, since their ballots refer to
/// them.
#[delete("/voters/<voter_id>")]
async fn delete_voter(
    token: AuthToken<Admin>,
    voter_id: Id,
    store: EligibilityStore,
    audit: AuditLog,
) -> Result<()> {
    let voter = store.delete_voter(voter_id).await?;

    audit
        .append(
            Some(token.principal()),
            "Deleted voter",
            Some(format!("Student number: {}", voter.student_number)),
        )
        .await?;
    Ok(())
}

#[post("/voters/<voter_id>/activate")]
async fn activate_voter(
    token: AuthToken<Admin>,
    voter_id: Id,
    store: EligibilityStore,
    audit: AuditLog,
) -> Result<Json<VoterDescription>> {
    let voter = store
        .voter(voter_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Voter {voter_id}")))?;
    store.activate(voter_id).await?;

    audit
        .append(Some(token.principal()), "Activated voter", Some(notes(voter_id)))
        .await?;
    Ok(Json(VoterDescription::new(voter, true)))
}

#[post("/voters/activate-all")]
async fn activate_all_voters(
    token: AuthToken<Admin>,
    store: EligibilityStore,
    audit: AuditLog,
) -> Result<Json<ActivatedCount>> {
    let activated = store.activate_all().await?;

    let admin: Principal = token.principal();
    for voter_id in &activated {
        audit
            .append(Some(admin), "Activated voter (bulk)", Some(notes(*voter_id)))
            .await?;
    }
    Ok(Json(ActivatedCount {
        activated: activated.len(),
    }))
}

#[get("/voters/inactive?<search>")]
async fn list_inactive_voters(
    _token: AuthToken<Admin>,
    search: Option<String>,
    store: EligibilityStore,
) -> Result<Json<Vec<VoterDescription>>> {
    let voters = store
        .inactive_voters(search.as_deref())
        .await?
        .into_iter()
        .map(|voter| VoterDescription::new(voter, false))
        .collect();
    Ok(Json(voters))
}

fn notes(voter_id: Id) -> String {
    format!("Voter: {voter_id}")
}
