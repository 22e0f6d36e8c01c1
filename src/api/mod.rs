use rocket::Route;

mod admin;
pub mod auth;
mod candidate;
mod election;
mod report;
mod voter;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(auth::routes());
    routes.extend(admin::routes());
    routes.extend(election::routes());
    routes.extend(candidate::routes());
    routes.extend(voter::routes());
    routes.extend(voting::routes());
    routes.extend(report::routes());
    routes
}
