//! Bulk-register voters from a JSON roster.
//! Rows go through the same voter registration the API uses, so a voter
//! imported here is indistinguishable from one created by an admin.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::BufReader;

use std::time::Duration;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use mongodb::{error::TRANSIENT_TRANSACTION_ERROR, options::ClientOptions, Client};
use rocket::{futures::future::join_all, serde::json::serde_json, tokio::time::sleep};

use univote_backend::model::{
    api::voter::VoterSpec,
    db::voter::NewVoter,
    eligibility::EligibilityStore,
    mongodb::{ensure_indexes_exist, is_duplicate_key_error},
};

const PROGRAM_NAME: &str = "roster-import";

const ABOUT_TEXT: &str = "Register voters from a JSON roster.

EXIT CODES:
     0: Every valid row was imported or already present.
     1: Error, or at least one row could not be registered.";

const ROSTER_PATH: &str = "ROSTER_PATH";
const DB_URI: &str = "db-uri";
const DB_NAME: &str = "db-name";
const CHUNK_SIZE: &str = "chunk-size";
const INACTIVE: &str = "inactive";

const ROSTER_PATH_HELP: &str = "The path to a JSON array of roster rows, each of the form\n\
{student_number, first_name, last_name, middle_name?, password?}";

const DEFAULT_CHUNK_SIZE: usize = 500;

/// How many times a row is attempted when its transaction conflicts.
const MAX_ATTEMPTS: u32 = 3;

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .arg(
            Arg::new(ROSTER_PATH)
                .help(ROSTER_PATH_HELP)
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new(DB_URI)
                .long(DB_URI)
                .help("MongoDB connection string")
                .action(ArgAction::Set)
                .default_value("mongodb://localhost:27017/?replicaSet=rs0"),
        )
        .arg(
            Arg::new(DB_NAME)
                .long(DB_NAME)
                .help("Database to import into")
                .action(ArgAction::Set)
                .default_value("univote"),
        )
        .arg(
            Arg::new(CHUNK_SIZE)
                .long(CHUNK_SIZE)
                .help("How many voters to register concurrently")
                .action(ArgAction::Set)
                .value_parser(value_parser!(usize))
                .default_value("500"),
        )
        .arg(
            Arg::new(INACTIVE)
                .long(INACTIVE)
                .help("Leave imported voters inactive until an admin activates them")
                .action(ArgAction::SetTrue),
        )
}

/// Errors that this program may produce.
#[derive(Debug)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// Failed to decode the roster.
    Format(String),
    /// Database error described by the inner message.
    Db(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IO(msg) => write!(f, "IO error: {msg}"),
            Self::Format(msg) => write!(f, "Invalid roster: {msg}"),
            Self::Db(msg) => write!(f, "Database error: {msg}"),
        }
    }
}

impl From<mongodb::error::Error> for Error {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Db(err.to_string())
    }
}

/// The rows worth trying to register, and what was dropped along the way.
#[derive(Debug, Default, PartialEq, Eq)]
struct Plan {
    rows: Vec<VoterSpec>,
    /// Rows with a blank required field.
    skipped: usize,
    /// Rows repeating a student number seen earlier in the same roster.
    duplicates: usize,
}

/// Normalise every row, dropping blank and repeated ones.
///
/// Repeats are dropped here rather than left to the unique index because
/// two concurrent registrations of the same student number would conflict
/// on their transactions instead of reporting a duplicate.
fn plan(rows: Vec<VoterSpec>) -> Plan {
    let mut plan = Plan::default();
    let mut seen = HashSet::new();
    for row in rows {
        match row.normalise() {
            Ok(row) if seen.insert(row.student_number.clone()) => plan.rows.push(row),
            Ok(_) => plan.duplicates += 1,
            Err(_) => plan.skipped += 1,
        }
    }
    plan
}

/// Final counts for the run.
#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    imported: usize,
    skipped: usize,
    duplicates: usize,
    /// Rows the database refused, with the reason.
    failed: Vec<(String, String)>,
}

impl Summary {
    /// Count the final outcome of registering one row.
    fn record(&mut self, student_number: &str, result: mongodb::error::Result<()>) {
        match result {
            Ok(()) => self.imported += 1,
            Err(err) if is_duplicate_key_error(&err) => self.duplicates += 1,
            Err(err) => self.failed.push((student_number.to_string(), err.to_string())),
        }
    }

    fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (student_number, reason) in &self.failed {
            writeln!(f, "Failed to import {student_number}: {reason}")?;
        }
        write!(
            f,
            "{} imported / {} skipped / {} duplicate{} / {} failed",
            self.imported,
            self.skipped,
            self.duplicates,
            if self.duplicates != 1 { "s" } else { "" },
            self.failed.len()
        )
    }
}

/// Load and parse the roster file.
fn load(path: &str) -> Result<Vec<VoterSpec>, Error> {
    let file = BufReader::new(File::open(path).map_err(|e| Error::IO(e.to_string()))?);
    serde_json::from_reader(file).map_err(|e| Error::Format(e.to_string()))
}

/// Register every planned row, `chunk_size` at a time.
///
/// A row that fails is recorded and the import carries on, since earlier
/// chunks have already committed.
async fn import(
    store: &EligibilityStore,
    plan: Plan,
    chunk_size: usize,
    activated: bool,
) -> Result<Summary, Error> {
    let mut summary = Summary {
        skipped: plan.skipped,
        duplicates: plan.duplicates,
        ..Summary::default()
    };

    // Hashing is the slow part, and only needs doing once per row.
    let voters = plan
        .rows
        .into_iter()
        .map(VoterSpec::into_voter)
        .collect::<Result<Vec<NewVoter>, _>>()
        .map_err(|e| Error::Format(e.to_string()))?;

    for chunk in voters.chunks(chunk_size.max(1)) {
        let results = join_all(chunk.iter().map(|voter| register(store, voter, activated))).await;
        for (voter, result) in chunk.iter().zip(results) {
            summary.record(&voter.student_number, result);
        }
    }
    Ok(summary)
}

/// Register one voter, retrying transient transaction failures.
async fn register(
    store: &EligibilityStore,
    voter: &NewVoter,
    activated: bool,
) -> mongodb::error::Result<()> {
    let mut attempt = 1;
    loop {
        match store.register_voter(voter.clone(), activated).await {
            Err(err) if err.contains_label(TRANSIENT_TRANSACTION_ERROR) && attempt < MAX_ATTEMPTS => {
                sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                attempt += 1;
            }
            result => return result.map(|_| ()),
        }
    }
}

/// Connect to the database, making sure the unique indexes that catch
/// duplicate voters are in place.
async fn connect(uri: &str, db_name: &str) -> Result<EligibilityStore, Error> {
    let options = ClientOptions::parse(uri).await?;
    let client = Client::with_options(options)?;
    let db = client.database(db_name);
    ensure_indexes_exist(&db).await?;
    Ok(EligibilityStore::new(client, &db))
}

/// Run the import, report the result, and return the exit code.
async fn run(args: &ArgMatches) -> u8 {
    // Arguments that are required or have defaults are guaranteed to be present.
    let path: &String = args.get_one(ROSTER_PATH).unwrap();
    let uri: &String = args.get_one(DB_URI).unwrap();
    let db_name: &String = args.get_one(DB_NAME).unwrap();
    let chunk_size = args
        .get_one::<usize>(CHUNK_SIZE)
        .copied()
        .unwrap_or(DEFAULT_CHUNK_SIZE);
    let activated = !args.get_flag(INACTIVE);

    let result = async {
        let plan = plan(load(path)?);
        let store = connect(uri, db_name).await?;
        import(&store, plan, chunk_size, activated).await
    }
    .await;

    match result {
        Ok(summary) => {
            println!("{summary}");
            if summary.succeeded() {
                0
            } else {
                1
            }
        }
        Err(err) => {
            println!("{err}");
            1
        }
    }
}

#[rocket::main]
async fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args).await;
    std::process::exit(exit_code.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_example_roster() {
        let plan = plan(load("example_rosters/roster.json").unwrap());
        let numbers: Vec<_> = plan.rows.iter().map(|r| r.student_number.as_str()).collect();
        assert_eq!(numbers, ["2021-00101", "2021-00102", "2021-00104"]);
        assert_eq!(plan.skipped, 1);
        assert_eq!(plan.duplicates, 1);

        // Blank optional fields are dropped.
        assert_eq!(plan.rows[2].middle_name, None);
        assert_eq!(plan.rows[1].middle_name.as_deref(), Some("Mathison"));
    }

    #[test]
    fn load_rejects_bad_files() {
        assert!(matches!(
            load("example_rosters/roster_malformed.json"),
            Err(Error::Format(_))
        ));
        assert!(matches!(load("not a real file"), Err(Error::IO(_))));
    }

    #[test]
    fn summary_is_human_readable() {
        let summary = Summary {
            imported: 3,
            skipped: 0,
            duplicates: 1,
            failed: vec![],
        };
        assert_eq!(
            summary.to_string(),
            "3 imported / 0 skipped / 1 duplicate / 0 failed"
        );
    }

    #[test]
    fn failed_rows_are_recorded_and_reported() {
        let mut summary = Summary::default();
        summary.record("2021-00101", Ok(()));
        let refused = mongodb::error::Error::custom("connection reset");
        summary.record("2021-00102", Err(refused));
        summary.record("2021-00104", Ok(()));

        assert_eq!(summary.imported, 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "2021-00102");
        assert!(!summary.succeeded());

        let report = summary.to_string();
        assert!(report.starts_with("Failed to import 2021-00102: "));
        assert!(report.ends_with("2 imported / 0 skipped / 0 duplicates / 1 failed"));
    }

    #[test]
    fn correct_cli_usage() {
        let command_line = [PROGRAM_NAME, "roster.json"];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(args.get_one::<usize>(CHUNK_SIZE), Some(&DEFAULT_CHUNK_SIZE));
        assert!(!args.get_flag(INACTIVE));

        let command_line = [
            PROGRAM_NAME,
            "roster.json",
            "--chunk-size",
            "50",
            "--inactive",
            "--db-name",
            "elsewhere",
        ];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(args.get_one::<usize>(CHUNK_SIZE), Some(&50));
        assert!(args.get_flag(INACTIVE));
        assert_eq!(
            args.get_one::<String>(DB_NAME).map(String::as_str),
            Some("elsewhere")
        );
    }

    #[test]
    fn bad_cli_usage() {
        // No roster.
        let command_line = [PROGRAM_NAME];
        cli().try_get_matches_from(command_line).unwrap_err();

        // Not a number.
        let command_line = [PROGRAM_NAME, "roster.json", "--chunk-size", "lots"];
        cli().try_get_matches_from(command_line).unwrap_err();
    }

    #[test]
    fn missing_roster_exits_with_error() {
        log4rs_test_utils::test_logging::init_logging_once_for(["univote_backend"], None, None);

        let command_line = [PROGRAM_NAME, "not a real file"];
        let args = cli().try_get_matches_from(command_line).unwrap();
        let runtime = rocket::tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        assert_eq!(runtime.block_on(run(&args)), 1);
    }
}
