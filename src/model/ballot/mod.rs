//! Ballot validation: the pure eligibility and well-formedness checks a
//! ballot must pass before, and again during, the ledger transaction.

mod error;
mod validator;

pub use error::{BallotError, BallotErrorBody, ErrorKind};
pub use validator::{validate, EligibilitySnapshot, Selection, ValidatedBallot};
