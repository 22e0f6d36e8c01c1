#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

pub use config::Config;

use crate::config::{ConfigFairing, DatabaseFairing};
use crate::logging::LoggerFairing;

pub mod api;
mod config;
pub mod error;
mod logging;
pub mod model;

/// Assemble the server: routes, config, database and request logging.
pub async fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(LoggerFairing)
}

/// Connect to the test database server, or `None` if there isn't a usable
/// one. Transactions need a replica set, so a standalone server counts as
/// unusable.
#[cfg(test)]
async fn db_client() -> Option<mongodb::Client> {
    use std::time::Duration;

    use log::warn;
    use mongodb::{bson::doc, options::ClientOptions};

    let uri = rocket::Config::figment()
        .extract_inner::<String>("db_uri")
        .unwrap_or_else(|_| "mongodb://localhost:27017/?replicaSet=rs0".to_string());
    let mut options = ClientOptions::parse(&uri).await.ok()?;
    options.server_selection_timeout = Some(Duration::from_secs(2));
    let client = mongodb::Client::with_options(options).ok()?;

    match client.database("admin").run_command(doc! { "hello": 1 }, None).await {
        Ok(hello) if hello.contains_key("setName") => Some(client),
        Ok(_) => {
            warn!("MongoDB at {uri} is not a replica set");
            None
        }
        Err(err) => {
            warn!("MongoDB at {uri} is unreachable: {err}");
            None
        }
    }
}

/// Environment variable that lets database tests be skipped rather than fail
/// when no replica set is available.
#[cfg(test)]
const SKIP_DB_TESTS_VAR: &str = "UNIVOTE_SKIP_DB_TESTS";

#[cfg(test)]
fn skip_db_tests() -> bool {
    skip_requested(std::env::var(SKIP_DB_TESTS_VAR).ok().as_deref())
}

/// Only an explicit truthy value opts out.
#[cfg(test)]
fn skip_requested(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes")
    )
}

/// Get a random database name to avoid collisions between tests.
#[cfg(test)]
fn database() -> String {
    let random: u32 = rand::random();
    format!("test{random}")
}

/// Build a rocket that uses the given client and database rather than
/// connecting through [`DatabaseFairing`].
#[cfg(test)]
async fn rocket_for_db(client: mongodb::Client, db_name: &str) -> Rocket<Build> {
    use crate::model::mongodb::ensure_indexes_exist;

    let db = client.database(db_name);
    ensure_indexes_exist(&db).await.unwrap();
    rocket::build()
        .mount("/", api::routes())
        .attach(ConfigFairing)
        .manage(client)
        .manage(db)
}
