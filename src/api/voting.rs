use log::debug;
use rocket::{serde::json::Json, Route};

use crate::{
    error::Result,
    logging::RequestId,
    model::{
        api::ballot::{BallotSubmission, VoteReceipt},
        auth::AuthToken,
        db::voter::Voter,
        ledger::Ledger,
        mongodb::Id,
    },
};

pub fn routes() -> Vec<Route> {
    routes![cast_ballot]
}

/// Cast the logged-in voter's ballot. The voter is always taken from the
/// auth token.
#[post("/elections/<election_id>/ballot", data = "<ballot>", format = "json")]
async fn cast_ballot(
    token: AuthToken<Voter>,
    election_id: Id,
    ballot: Json<BallotSubmission>,
    ledger: Ledger,
    request_id: &RequestId,
) -> Result<Json<VoteReceipt>> {
    let selections = ballot.selections();
    debug!(
        "req{request_id} voter {} submitting {} selections",
        token.id(),
        selections.len()
    );

    let votes = ledger
        .submit_ballot(token.principal(), election_id, &selections)
        .await?;
    Ok(Json(VoteReceipt::new(election_id.into(), votes)))
}
