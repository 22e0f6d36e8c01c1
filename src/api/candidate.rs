use log::info;
use mongodb::{bson::doc, options::FindOptions};
use rocket::{futures::TryStreamExt, serde::json::Json, Route};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            candidate::{BallotPage, CandidateDescription, CandidateSpec},
            position::{PositionDescription, PositionSpec},
        },
        audit::AuditLog,
        auth::AuthToken,
        db::{
            admin::Admin,
            candidate::Candidate,
            election::Election,
            position::{NewPosition, Position},
        },
        eligibility::EligibilityStore,
        mongodb::{Coll, Id},
    },
};

pub fn routes() -> Vec<Route> {
    routes![
        list_positions,
        create_position,
        list_candidates,
        create_candidate
    ]
}

#[get("/positions")]
async fn list_positions(
    _token: AuthToken<Admin>,
    positions: Coll<Position>,
) -> Result<Json<Vec<PositionDescription>>> {
    let options = FindOptions::builder().sort(doc! { "name": 1 }).build();
    let positions = positions
        .find(None, options)
        .await?
        .map_ok(PositionDescription::from)
        .try_collect()
        .await?;
    Ok(Json(positions))
}

#[post("/positions", data = "<spec>", format = "json")]
async fn create_position(
    token: AuthToken<Admin>,
    spec: Json<PositionSpec>,
    positions: Coll<Position>,
    audit: AuditLog,
) -> Result<Json<PositionDescription>> {
    let position = Position {
        id: Id::new(),
        position: NewPosition::try_from(spec.0)?,
    };
    positions
        .insert_one(&position, None)
        .await
        .map_err(|err| {
            Error::conflict_on_duplicate(err, || {
                format!("Position {} already exists", position.name)
            })
        })?;

    info!("Created position {} ({})", position.id, position.name);
    audit
        .append(
            Some(token.principal()),
            format!("Created position: {}", position.name),
            None,
        )
        .await?;
    Ok(Json(position.into()))
}

/// An election's candidates, grouped by the position they stand for.
#[get("/elections/<election_id>/candidates")]
async fn list_candidates(
    _token: AuthToken<Admin>,
    election_id: Id,
    store: EligibilityStore,
    positions: Coll<Position>,
) -> Result<Json<BallotPage>> {
    let election = store
        .election(election_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {election_id}")))?;

    let candidates = store.candidates(election_id).await?;
    let positions = positions.find(None, None).await?.try_collect().await?;
    Ok(Json(BallotPage::new(election.into(), positions, candidates)))
}

#[post("/elections/<election_id>/candidates", data = "<spec>", format = "json")]
async fn create_candidate(
    token: AuthToken<Admin>,
    election_id: Id,
    spec: Json<CandidateSpec>,
    elections: Coll<Election>,
    positions: Coll<Position>,
    candidates: Coll<Candidate>,
    audit: AuditLog,
) -> Result<Json<CandidateDescription>> {
    let new_candidate = spec.0.into_candidate(election_id)?;

    let election = elections
        .find_one(election_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {election_id}")))?;
    let position_id = new_candidate.position_id;
    positions
        .find_one(position_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Position {position_id}")))?;

    let candidate = Candidate {
        id: Id::new(),
        candidate: new_candidate,
    };
    candidates
        .insert_one(&candidate, None)
        .await
        .map_err(|err| {
            Error::conflict_on_duplicate(err, || {
                format!("Candidate code {} is already in use", candidate.code)
            })
        })?;

    info!(
        "Created candidate {} ({}) in election {election_id}",
        candidate.id, candidate.name
    );
    audit
        .append(
            Some(token.principal()),
            format!("Created candidate: {}", candidate.name),
            Some(format!("Election: {}", election.name)),
        )
        .await?;
    Ok(Json(candidate.into()))
}
